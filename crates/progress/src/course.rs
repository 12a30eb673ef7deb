//! Course completion evaluation.

use std::sync::Arc;

use lessonflow_core::{ActorId, Certificate, CourseId, DomainEvent, Event, StudentId};
use lessonflow_storage::Transaction;
use tracing::{debug, info};

use crate::certificate::{CertificateIssuer, StorageCertificateIssuer};
use crate::error::{ProgressError, Result};
use crate::statistics::{StatisticsRepository, StorageStatistics};

/// What an evaluation did to the enrollment.
#[derive(Debug, Clone, PartialEq)]
pub enum CourseEvaluation {
    /// The enrollment transitioned to completed
    Completed {
        /// Finished chapters
        finished_chapter_count: u32,
        /// Certificate issued for the completion
        certificate: Option<Certificate>,
    },
    /// The enrollment is in progress
    InProgress {
        /// Finished chapters
        finished_chapter_count: u32,
    },
    /// Nothing matched the guard (already completed, or not enrolled)
    Unchanged,
}

/// Recomputes a student's course progress from finished chapters.
#[derive(Clone)]
pub struct CourseCompletionEvaluator {
    certificates: Arc<dyn CertificateIssuer>,
    statistics: Arc<dyn StatisticsRepository>,
}

impl Default for CourseCompletionEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(StorageCertificateIssuer), Arc::new(StorageStatistics))
    }
}

impl CourseCompletionEvaluator {
    /// Create a new evaluator.
    pub fn new(
        certificates: Arc<dyn CertificateIssuer>,
        statistics: Arc<dyn StatisticsRepository>,
    ) -> Self {
        Self {
            certificates,
            statistics,
        }
    }

    /// Replace the certificate issuer.
    pub fn with_certificate_issuer(mut self, certificates: Arc<dyn CertificateIssuer>) -> Self {
        self.certificates = certificates;
        self
    }

    /// Replace the statistics repository.
    pub fn with_statistics(mut self, statistics: Arc<dyn StatisticsRepository>) -> Self {
        self.statistics = statistics;
        self
    }

    /// Recount finished chapters and update the enrollment.
    ///
    /// Certificate, counters and events follow only the call whose guarded
    /// update actually completed the enrollment.
    pub async fn evaluate(
        &self,
        tx: &mut dyn Transaction,
        course_id: CourseId,
        student_id: StudentId,
        language: &str,
    ) -> Result<CourseEvaluation> {
        let course = tx
            .load_course(course_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(format!("course {}", course_id)))?;
        let finished = tx.count_finished_chapters(student_id, course_id).await?;

        if finished != course.chapter_count {
            let changed = tx
                .mark_enrollment_in_progress(student_id, course_id, finished)
                .await?;
            debug!(%student_id, %course_id, finished, chapter_count = course.chapter_count, changed, "Course in progress");
            return Ok(if changed {
                CourseEvaluation::InProgress {
                    finished_chapter_count: finished,
                }
            } else {
                CourseEvaluation::Unchanged
            });
        }

        let completed_at = chrono::Utc::now();
        if !tx
            .complete_enrollment(student_id, course_id, finished, completed_at, language)
            .await?
        {
            debug!(%student_id, %course_id, "Enrollment not eligible for completion");
            return Ok(CourseEvaluation::Unchanged);
        }

        let certificate = if course.has_certificate {
            let certificate = self
                .certificates
                .create_certificate(tx, student_id, course_id)
                .await?;
            self.statistics
                .update_completed_as_freemium_courses_stats(tx, course_id)
                .await?;
            Some(certificate)
        } else {
            self.statistics
                .update_paid_purchased_courses_stats(tx, course_id)
                .await?;
            None
        };

        let actor = ActorId::student(student_id);
        tx.enqueue_event(&Event::new(
            actor.clone(),
            DomainEvent::CourseCompleted {
                student_id,
                course_id,
                completed_at,
                language: language.to_string(),
                certificate_issued: certificate.is_some(),
            },
        ))
        .await?;
        tx.enqueue_event(&Event::new(
            actor.clone(),
            DomainEvent::UserCourseFinished {
                user_id: student_id,
                course_id,
                actor,
            },
        ))
        .await?;

        info!(%student_id, %course_id, %language, certificate = certificate.is_some(), "Course completed");
        Ok(CourseEvaluation::Completed {
            finished_chapter_count: finished,
            certificate,
        })
    }
}
