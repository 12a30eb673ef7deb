//! lessonflow core data models.
//!
//! This crate defines the content records read by the progress engine, the
//! progress rows it owns, and the domain events it emits.

#![warn(missing_docs)]

// Core identities
mod id;

// Content (read-only for the engine)
mod content;

// Progress rows
mod progress;

// Facts
mod event;

// Re-exports
pub use id::*;

pub use content::{Chapter, Course, Lesson, LessonType, Role, Student};
pub use progress::{
    AiMentorJudgement, AiMentorRecord, Certificate, ChapterProgress, CourseProgress, CourseStat,
    EnrollmentStatus, LessonProgress, StudentCourseEnrollment, COMPLETED_LANGUAGE_KEY,
};
pub use event::{ActorId, DomainEvent, Event};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

/// Error returned when a stored enum value is not recognised.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    /// Create a new parse error.
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
