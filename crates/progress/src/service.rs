//! The progress service: one transaction per request, outbox after commit.

use std::collections::BTreeSet;
use std::sync::Arc;

use lessonflow_core::{
    ChapterProgress, CourseId, LessonId, LessonProgress, Role, StudentCourseEnrollment, StudentId,
};
use lessonflow_storage::{Storage, Transaction};
use serde::Serialize;
use tracing::{info, warn};

use crate::certificate::CertificateIssuer;
use crate::config::ProgressConfig;
use crate::error::{ProgressError, Result};
use crate::localization::LocalizationResolver;
use crate::publisher::{EventPublisher, OutboxDispatcher};
use crate::retake::{RetakeDecision, RetakePolicy};
use crate::statistics::StatisticsRepository;
use crate::tracker::{
    CompletionContext, CompletionOutcome, LessonProgressTracker, QuizProgressUpdate,
};

/// Everything recorded for a student.
#[derive(Debug, Clone, Serialize)]
pub struct StudentProgressReport {
    /// Student
    pub student_id: StudentId,
    /// Lesson rows
    pub lessons: Vec<LessonProgress>,
    /// Chapter rows
    pub chapters: Vec<ChapterProgress>,
    /// Enrollments of the courses the chapters belong to
    pub enrollments: Vec<StudentCourseEnrollment>,
}

/// Entry point for recording lesson progress.
///
/// Each operation runs in its own transaction. On error the transaction is
/// rolled back and nothing is dispatched.
pub struct ProgressService {
    storage: Arc<dyn Storage>,
    publisher: Arc<dyn EventPublisher>,
    tracker: LessonProgressTracker,
    dispatcher: OutboxDispatcher,
    retake: RetakePolicy,
    config: ProgressConfig,
}

impl ProgressService {
    /// Create a new service with default configuration.
    pub fn new(storage: Arc<dyn Storage>, publisher: Arc<dyn EventPublisher>) -> Self {
        let config = ProgressConfig::default();
        Self {
            dispatcher: OutboxDispatcher::new(
                storage.clone(),
                publisher.clone(),
                config.outbox_batch_size,
            ),
            storage,
            publisher,
            tracker: LessonProgressTracker::new(),
            retake: RetakePolicy,
            config,
        }
    }

    /// Set configuration.
    pub fn with_config(mut self, config: ProgressConfig) -> Self {
        self.dispatcher = OutboxDispatcher::new(
            self.storage.clone(),
            self.publisher.clone(),
            config.outbox_batch_size,
        );
        self.config = config;
        self
    }

    /// Set the localization resolver.
    pub fn with_localization(mut self, localization: Arc<dyn LocalizationResolver>) -> Self {
        self.tracker = self.tracker.with_localization(localization);
        self
    }

    /// Set the certificate issuer.
    pub fn with_certificate_issuer(mut self, certificates: Arc<dyn CertificateIssuer>) -> Self {
        self.tracker = self.tracker.with_certificate_issuer(certificates);
        self
    }

    /// Set the statistics repository.
    pub fn with_statistics(mut self, statistics: Arc<dyn StatisticsRepository>) -> Self {
        self.tracker = self.tracker.with_statistics(statistics);
        self
    }

    /// Mark a lesson as started.
    pub async fn mark_lesson_as_started(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
        role: Role,
    ) -> Result<bool> {
        let mut tx = self.storage.begin().await?;
        let result = self
            .tracker
            .mark_started(tx.as_mut(), lesson_id, student_id, role)
            .await;
        self.finish(tx, result).await
    }

    /// Mark a lesson as completed and run the cascade.
    pub async fn mark_lesson_as_completed(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
        role: Role,
        context: &CompletionContext,
    ) -> Result<CompletionOutcome> {
        let mut tx = self.storage.begin().await?;
        let result = self
            .tracker
            .mark_completed(tx.as_mut(), lesson_id, student_id, role, context)
            .await;
        self.finish(tx, result).await
    }

    /// Record a quiz attempt, possibly a retake.
    pub async fn update_quiz_progress(&self, update: &QuizProgressUpdate) -> Result<bool> {
        let mut tx = self.storage.begin().await?;
        let result = self.tracker.update_quiz_progress(tx.as_mut(), update).await;
        self.finish(tx, result).await
    }

    /// Whether a student may attempt a quiz again, and with which counter.
    pub async fn retake_eligibility(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<RetakeDecision> {
        let mut tx = self.storage.begin().await?;
        let result: Result<RetakeDecision> = async {
            let lesson = tx
                .load_lesson(lesson_id)
                .await?
                .ok_or_else(|| ProgressError::NotFound(format!("lesson {}", lesson_id)))?;
            let progress = tx
                .load_lesson_progress(student_id, lesson_id, lesson.chapter_id)
                .await?;
            Ok(self
                .retake
                .evaluate(&lesson, progress.as_ref(), chrono::Utc::now()))
        }
        .await;
        tx.rollback().await?;
        result
    }

    /// Collect a student's progress, optionally limited to one course.
    pub async fn student_progress(
        &self,
        student_id: StudentId,
        course_id: Option<CourseId>,
    ) -> Result<StudentProgressReport> {
        let mut tx = self.storage.begin().await?;
        let result = Self::collect_progress(tx.as_mut(), student_id, course_id).await;
        tx.rollback().await?;
        result
    }

    /// Dispatch committed events that are still pending.
    pub async fn dispatch_events(&self) -> Result<usize> {
        self.dispatcher.dispatch_pending().await
    }

    /// Delete dispatched events older than the configured retention.
    pub async fn prune_events(&self) -> Result<usize> {
        let retention = chrono::Duration::hours(i64::from(self.config.outbox_retention_hours));
        let pruned = self
            .storage
            .prune_dispatched_events(chrono::Utc::now() - retention)
            .await?;
        if pruned > 0 {
            info!(pruned, "Outbox pruned");
        }
        Ok(pruned)
    }

    async fn collect_progress(
        tx: &mut dyn Transaction,
        student_id: StudentId,
        course_id: Option<CourseId>,
    ) -> Result<StudentProgressReport> {
        if tx.load_student(student_id).await?.is_none() {
            return Err(ProgressError::NotFound(format!("student {}", student_id)));
        }

        let chapters: Vec<ChapterProgress> = tx
            .list_chapter_progress(student_id)
            .await?
            .into_iter()
            .filter(|c| course_id.map_or(true, |id| c.course_id == id))
            .collect();

        let mut lessons = Vec::new();
        for progress in tx.list_lesson_progress(student_id).await? {
            let keep = match course_id {
                None => true,
                Some(id) => tx
                    .load_chapter(progress.chapter_id)
                    .await?
                    .is_some_and(|c| c.course_id == id),
            };
            if keep {
                lessons.push(progress);
            }
        }

        let course_ids: BTreeSet<CourseId> = match course_id {
            Some(id) => BTreeSet::from([id]),
            None => chapters.iter().map(|c| c.course_id).collect(),
        };
        let mut enrollments = Vec::new();
        for id in course_ids {
            if let Some(enrollment) = tx.load_enrollment(student_id, id).await? {
                enrollments.push(enrollment);
            }
        }

        Ok(StudentProgressReport {
            student_id,
            lessons,
            chapters,
            enrollments,
        })
    }

    async fn finish<T>(&self, tx: Box<dyn Transaction>, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                if self.config.dispatch_after_commit {
                    if let Err(e) = self.dispatcher.dispatch_pending().await {
                        warn!(error = %e, "Outbox dispatch failed, events stay pending");
                    }
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}
