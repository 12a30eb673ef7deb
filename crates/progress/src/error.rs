//! Error types for progress operations.

use lessonflow_core::{LessonId, StudentId};
use lessonflow_storage::StorageError;

/// Result type for progress operations.
pub type Result<T> = std::result::Result<T, ProgressError>;

/// Errors that abort a progress operation.
///
/// Any of these rolls back the enclosing transaction. Idempotent no-ops are
/// not errors, see [`crate::CompletionOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// The student has neither an enrollment nor freemium access
    #[error("Access denied: student {student_id} cannot record progress on lesson {lesson_id}")]
    AccessDenied {
        /// Student
        student_id: StudentId,
        /// Lesson
        lesson_id: LessonId,
    },

    /// Missing lesson, chapter, course or student
    #[error("Not found: {0}")]
    NotFound(String),

    /// Completion preconditions not met
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Event publisher rejected an event
    #[error("Publish failed: {0}")]
    Publish(String),
}
