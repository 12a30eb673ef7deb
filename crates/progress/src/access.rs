//! Access resolution for lesson progress.

use lessonflow_core::{
    ChapterId, CourseId, EnrollmentStatus, Lesson, LessonId, LessonType, StudentId,
};
use lessonflow_storage::Transaction;

use crate::error::{ProgressError, Result};

/// What a student may do with a lesson, plus the linkage the cascade needs.
#[derive(Debug, Clone)]
pub struct LessonAccess {
    /// The student holds an `Enrolled` enrollment in the lesson's course
    pub is_assigned: bool,
    /// The lesson's chapter is freemium
    pub is_freemium: bool,
    /// Quiz attempts already used
    pub attempts: u32,
    /// The lesson is already completed
    pub lesson_is_completed: bool,
    /// Lesson kind
    pub lesson_type: LessonType,
    /// Chapter of the lesson
    pub chapter_id: ChapterId,
    /// Course of the chapter
    pub course_id: CourseId,
    /// Lessons in the chapter
    pub chapter_lesson_count: u32,
    /// The lesson itself
    pub lesson: Lesson,
}

impl LessonAccess {
    /// Whether any progress may be recorded.
    pub fn is_allowed(&self) -> bool {
        self.is_assigned || self.is_freemium
    }

    /// Progress made through freemium access only. Such progress is tracked
    /// up to the chapter but never completes a course.
    pub fn is_freemium_only(&self) -> bool {
        self.is_freemium && !self.is_assigned
    }

    /// The attempt budget is used up: more than one attempt, or the lesson's
    /// own limit reached.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts > 1
            || self
                .lesson
                .attempts_limit
                .is_some_and(|limit| self.attempts >= limit)
    }

    /// Fail with `AccessDenied` unless progress may be recorded.
    pub fn ensure_allowed(&self, student_id: StudentId) -> Result<()> {
        if self.is_allowed() {
            Ok(())
        } else {
            Err(ProgressError::AccessDenied {
                student_id,
                lesson_id: self.lesson.id,
            })
        }
    }
}

/// Resolves a student's access to a lesson.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessResolver;

impl AccessResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve access of `student_id` to `lesson_id`.
    ///
    /// Fails with `NotFound` when the lesson does not link to a chapter and
    /// course, or when the student is missing or soft-deleted.
    pub async fn resolve(
        &self,
        tx: &mut dyn Transaction,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<LessonAccess> {
        let student = tx
            .load_student(student_id)
            .await?
            .filter(|s| s.is_active())
            .ok_or_else(|| ProgressError::NotFound(format!("student {}", student_id)))?;

        let lesson = tx
            .load_lesson(lesson_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(format!("lesson {}", lesson_id)))?;

        let chapter = tx.load_chapter(lesson.chapter_id).await?.ok_or_else(|| {
            ProgressError::NotFound(format!(
                "chapter {} of lesson {}",
                lesson.chapter_id, lesson_id
            ))
        })?;

        if tx.load_course(chapter.course_id).await?.is_none() {
            return Err(ProgressError::NotFound(format!(
                "course {} of chapter {}",
                chapter.course_id, chapter.id
            )));
        }

        let is_assigned = tx
            .load_enrollment(student.id, chapter.course_id)
            .await?
            .is_some_and(|e| e.status == EnrollmentStatus::Enrolled);

        let progress = tx
            .load_lesson_progress(student.id, lesson.id, chapter.id)
            .await?;

        Ok(LessonAccess {
            is_assigned,
            is_freemium: chapter.is_freemium,
            attempts: progress.as_ref().map_or(0, |p| p.attempts),
            lesson_is_completed: progress.as_ref().is_some_and(|p| p.is_completed()),
            lesson_type: lesson.lesson_type,
            chapter_id: chapter.id,
            course_id: chapter.course_id,
            chapter_lesson_count: chapter.lesson_count,
            lesson,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChapterShape, Fixture};
    use lessonflow_core::{StudentCourseEnrollment, Student};
    use lessonflow_storage::Storage;

    #[tokio::test]
    async fn test_enrolled_student_is_assigned() {
        let fx = Fixture::memory(&[ChapterShape::content(2)], true, true).await;
        let mut tx = fx.storage.begin().await.unwrap();

        let access = AccessResolver::new()
            .resolve(tx.as_mut(), fx.lessons[0].id, fx.student.id)
            .await
            .unwrap();

        assert!(access.is_assigned);
        assert!(!access.is_freemium);
        assert!(access.is_allowed());
        assert_eq!(access.attempts, 0);
        assert!(!access.lesson_is_completed);
        assert_eq!(access.course_id, fx.course.id);
        assert_eq!(access.chapter_lesson_count, 2);
    }

    #[tokio::test]
    async fn test_freemium_chapter_without_enrollment() {
        let fx = Fixture::memory(&[ChapterShape::freemium(1)], true, false).await;
        let mut tx = fx.storage.begin().await.unwrap();

        let access = AccessResolver::new()
            .resolve(tx.as_mut(), fx.lessons[0].id, fx.student.id)
            .await
            .unwrap();

        assert!(!access.is_assigned);
        assert!(access.is_freemium);
        assert!(access.is_freemium_only());
        assert!(access.ensure_allowed(fx.student.id).is_ok());
    }

    #[tokio::test]
    async fn test_revoked_enrollment_is_denied() {
        let fx = Fixture::memory(&[ChapterShape::content(1)], true, false).await;
        let mut tx = fx.storage.begin().await.unwrap();
        let mut enrollment = StudentCourseEnrollment::enrolled(fx.student.id, fx.course.id);
        enrollment.status = EnrollmentStatus::Revoked;
        tx.save_enrollment(&enrollment).await.unwrap();

        let access = AccessResolver::new()
            .resolve(tx.as_mut(), fx.lessons[0].id, fx.student.id)
            .await
            .unwrap();

        assert!(!access.is_allowed());
        let err = access.ensure_allowed(fx.student.id).unwrap_err();
        assert!(matches!(err, ProgressError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_missing_lesson_and_deleted_student_are_not_found() {
        let fx = Fixture::memory(&[ChapterShape::content(1)], true, true).await;
        let mut tx = fx.storage.begin().await.unwrap();

        let err = AccessResolver::new()
            .resolve(tx.as_mut(), LessonId::new(), fx.student.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::NotFound(_)));

        tx.save_student(&Student {
            deleted_at: Some(chrono::Utc::now()),
            ..fx.student.clone()
        })
        .await
        .unwrap();
        let err = AccessResolver::new()
            .resolve(tx.as_mut(), fx.lessons[0].id, fx.student.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_orphan_lesson_is_not_found() {
        let fx = Fixture::memory(&[ChapterShape::content(1)], true, true).await;
        let mut tx = fx.storage.begin().await.unwrap();
        let orphan = Lesson {
            id: LessonId::new(),
            chapter_id: ChapterId::new(),
            ..fx.lessons[0].clone()
        };
        tx.save_lesson(&orphan).await.unwrap();

        let err = AccessResolver::new()
            .resolve(tx.as_mut(), orphan.id, fx.student.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::NotFound(_)));
    }
}
