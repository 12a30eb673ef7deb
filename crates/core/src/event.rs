//! Domain events - facts emitted by the progress engine.
//!
//! The set of events is closed. Consumers are expected to match exhaustively
//! on [`DomainEvent`].

use crate::id::{ChapterId, CourseId, EventId, LessonId, StudentId};
use crate::Time;
use serde::{Deserialize, Serialize};

/// An event is an atomic fact that happened at a specific time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier
    pub id: EventId,

    /// When it happened
    pub timestamp: Time,

    /// Who caused it
    pub actor: ActorId,

    /// What happened
    pub payload: DomainEvent,
}

impl Event {
    /// Create a new event.
    pub fn new(actor: ActorId, payload: DomainEvent) -> Self {
        Self {
            id: EventId::new(),
            timestamp: chrono::Utc::now(),
            actor,
            payload,
        }
    }
}

/// The closed set of progress facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A student completed a lesson for the first time.
    LessonCompleted {
        /// Student who completed the lesson
        student_id: StudentId,
        /// Course the lesson belongs to
        course_id: CourseId,
        /// Completed lesson
        lesson_id: LessonId,
    },
    /// Every lesson of a chapter is completed.
    ChapterFinished {
        /// Finished chapter
        chapter_id: ChapterId,
        /// Course the chapter belongs to
        course_id: CourseId,
        /// Student who finished it
        student_id: StudentId,
    },
    /// An enrolled student completed every chapter of a course.
    CourseCompleted {
        /// Student who completed the course
        student_id: StudentId,
        /// Completed course
        course_id: CourseId,
        /// When the enrollment was marked completed
        completed_at: Time,
        /// Language the course was completed in
        language: String,
        /// Whether a certificate was created
        certificate_issued: bool,
    },
    /// Activity-feed flavour of course completion.
    UserCourseFinished {
        /// Student shown in the feed
        user_id: StudentId,
        /// Finished course
        course_id: CourseId,
        /// Who caused the event
        actor: ActorId,
    },
}

impl DomainEvent {
    /// Stable name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::LessonCompleted { .. } => "lesson_completed",
            DomainEvent::ChapterFinished { .. } => "chapter_finished",
            DomainEvent::CourseCompleted { .. } => "course_completed",
            DomainEvent::UserCourseFinished { .. } => "user_course_finished",
        }
    }
}

/// Identifier for whoever caused an event (a student or the system).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    /// Create a new actor ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// System actor ID
    pub fn system() -> Self {
        Self("system".to_string())
    }

    /// Actor ID of a student
    pub fn student(id: StudentId) -> Self {
        Self(format!("student:{}", id))
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let student_id = StudentId::new();
        let event = Event::new(
            ActorId::student(student_id),
            DomainEvent::LessonCompleted {
                student_id,
                course_id: CourseId::new(),
                lesson_id: LessonId::new(),
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "lesson_completed");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_actor_display() {
        assert_eq!(ActorId::system().to_string(), "system");
        let id = StudentId::new();
        assert_eq!(ActorId::student(id).to_string(), format!("student:{}", id));
    }
}
