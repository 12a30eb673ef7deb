//! Storage trait abstraction.
//!
//! All progress writes happen inside a [`Transaction`] handed out by
//! [`Storage::begin`]. Components receive the transaction from their caller
//! and never open or commit one themselves.

use async_trait::async_trait;
use lessonflow_core::{
    AiMentorRecord, Certificate, Chapter, ChapterId, ChapterProgress, Course, CourseId,
    CourseStat, Event, EventId, Lesson, LessonId, LessonProgress, ProgressId, Student,
    StudentCourseEnrollment, StudentId, Time,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique key already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// A unit of work over the progress store.
///
/// Writes become visible to other transactions only after [`commit`].
/// Dropping a transaction without committing discards every write made
/// through it, outbox records included.
///
/// [`commit`]: Transaction::commit
#[async_trait]
pub trait Transaction: Send {
    // === Content ===

    /// Load a course by ID.
    async fn load_course(&mut self, id: CourseId) -> Result<Option<Course>>;

    /// Load a chapter by ID.
    async fn load_chapter(&mut self, id: ChapterId) -> Result<Option<Chapter>>;

    /// Load a lesson by ID.
    async fn load_lesson(&mut self, id: LessonId) -> Result<Option<Lesson>>;

    /// Load a student by ID, soft-deleted ones included.
    async fn load_student(&mut self, id: StudentId) -> Result<Option<Student>>;

    /// Save a course (create or update).
    async fn save_course(&mut self, course: &Course) -> Result<()>;

    /// Save a chapter (create or update).
    async fn save_chapter(&mut self, chapter: &Chapter) -> Result<()>;

    /// Save a lesson (create or update).
    async fn save_lesson(&mut self, lesson: &Lesson) -> Result<()>;

    /// Save a student (create or update).
    async fn save_student(&mut self, student: &Student) -> Result<()>;

    // === Enrollment ===

    /// Load the enrollment of a student in a course.
    async fn load_enrollment(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<StudentCourseEnrollment>>;

    /// Save an enrollment (create or update).
    async fn save_enrollment(&mut self, enrollment: &StudentCourseEnrollment) -> Result<()>;

    /// Mark an enrollment completed.
    ///
    /// Only affects a row whose status is `Enrolled` and whose progress is not
    /// already `Completed`. Merges `language` into the completion metadata.
    /// Returns whether a row changed.
    async fn complete_enrollment(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
        finished_chapter_count: u32,
        completed_at: Time,
        language: &str,
    ) -> Result<bool>;

    /// Mark an enrollment in progress without touching `completed_at`.
    ///
    /// Same guard as [`Transaction::complete_enrollment`].
    async fn mark_enrollment_in_progress(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
        finished_chapter_count: u32,
    ) -> Result<bool>;

    // === Lesson progress ===

    /// Load the progress row for `(student, lesson, chapter)`.
    async fn load_lesson_progress(
        &mut self,
        student_id: StudentId,
        lesson_id: LessonId,
        chapter_id: ChapterId,
    ) -> Result<Option<LessonProgress>>;

    /// Insert a new progress row. Fails with `Conflict` if the key exists.
    async fn insert_lesson_progress(&mut self, progress: &LessonProgress) -> Result<()>;

    /// Overwrite an existing progress row, matched by its ID.
    async fn update_lesson_progress(&mut self, progress: &LessonProgress) -> Result<()>;

    /// Set `completed_at` if and only if it is currently unset.
    /// Returns whether a row changed.
    async fn mark_lesson_completed(&mut self, id: ProgressId, completed_at: Time) -> Result<bool>;

    /// Count completed lessons of a student in a chapter.
    async fn count_completed_lessons(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
    ) -> Result<u32>;

    /// List every lesson progress row of a student.
    async fn list_lesson_progress(&mut self, student_id: StudentId) -> Result<Vec<LessonProgress>>;

    /// Load the AI mentor judgement of a progress row.
    async fn load_ai_mentor_record(&mut self, progress_id: ProgressId)
        -> Result<Option<AiMentorRecord>>;

    /// Save the AI mentor judgement of a progress row (create or update).
    async fn save_ai_mentor_record(&mut self, record: &AiMentorRecord) -> Result<()>;

    // === Chapter progress ===

    /// Load the chapter progress of a student.
    async fn load_chapter_progress(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
    ) -> Result<Option<ChapterProgress>>;

    /// Create or refresh a chapter progress row with a recomputed count.
    /// Never touches `completed_at`.
    async fn upsert_chapter_progress(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
        course_id: CourseId,
        completed_lesson_count: u32,
        completed_as_freemium: bool,
    ) -> Result<()>;

    /// Set the chapter `completed_at` if and only if it is currently unset.
    /// Returns whether a row changed.
    async fn mark_chapter_completed(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
        completed_at: Time,
    ) -> Result<bool>;

    /// Count distinct finished chapters of a student in a course.
    async fn count_finished_chapters(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<u32>;

    /// List every chapter progress row of a student.
    async fn list_chapter_progress(&mut self, student_id: StudentId)
        -> Result<Vec<ChapterProgress>>;

    // === Certificates ===

    /// Load the certificate of a student for a course.
    async fn load_certificate(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<Certificate>>;

    /// Insert a certificate. Fails with `Conflict` if one exists for the pair.
    async fn insert_certificate(&mut self, certificate: &Certificate) -> Result<()>;

    // === Statistics ===

    /// Increment a course counter.
    async fn increment_course_stat(&mut self, course_id: CourseId, stat: CourseStat) -> Result<()>;

    /// Read a course counter.
    async fn load_course_stat(&mut self, course_id: CourseId, stat: CourseStat) -> Result<u64>;

    // === Outbox ===

    /// Record an event to be dispatched once this transaction commits.
    async fn enqueue_event(&mut self, event: &Event) -> Result<()>;

    // === Transaction control ===

    /// Make every write of this transaction visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Storage abstraction for lessonflow data.
///
/// This trait allows different storage backends to be plugged in.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Committed outbox events not yet dispatched, oldest first.
    async fn pending_events(&self, limit: usize) -> Result<Vec<Event>>;

    /// Mark outbox events as dispatched.
    async fn mark_events_dispatched(&self, ids: &[EventId]) -> Result<()>;

    /// Delete events dispatched before `before`. Pending events are kept.
    /// Returns how many were deleted.
    async fn prune_dispatched_events(&self, before: Time) -> Result<usize>;
}
