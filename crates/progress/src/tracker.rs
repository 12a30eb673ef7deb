//! Lesson progress tracking and the completion cascade.

use std::sync::Arc;

use lessonflow_core::{
    ActorId, AiMentorJudgement, AiMentorRecord, ChapterId, DomainEvent, Event, LessonId,
    LessonProgress, LessonType, ProgressId, Role, StudentId,
};
use lessonflow_storage::Transaction;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::access::{AccessResolver, LessonAccess};
use crate::certificate::CertificateIssuer;
use crate::chapter::ChapterAggregator;
use crate::course::CourseCompletionEvaluator;
use crate::error::{ProgressError, Result};
use crate::localization::{ContentLocalization, LocalizationResolver, LocalizedEntity};
use crate::statistics::StatisticsRepository;

/// Input of a completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionContext {
    /// The student answered every quiz question
    pub quiz_completed: bool,
    /// The quiz attempt passed
    pub is_quiz_passed: bool,
    /// Quiz questions answered so far
    pub completed_question_count: u32,
    /// Verdict of the AI mentor
    pub ai_mentor_judgement: Option<AiMentorJudgement>,
    /// Language the student used
    pub language: Option<String>,
}

/// Explicit quiz progress write, used for retakes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizProgressUpdate {
    /// Chapter of the lesson
    pub chapter_id: ChapterId,
    /// Quiz lesson
    pub lesson_id: LessonId,
    /// Student
    pub student_id: StudentId,
    /// Questions answered
    pub completed_question_count: u32,
    /// Score of the attempt
    pub quiz_score: u32,
    /// Attempt counter computed by the caller
    pub attempts: u32,
    /// The attempt passed
    pub is_quiz_passed: bool,
    /// Whether the lesson ends up completed; `false` clears the completion
    pub is_completed: bool,
    /// Language the student answered in
    #[serde(default)]
    pub language_answered: Option<String>,
}

/// Why a completion request left no trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Admins and content creators are not tracked
    PrivilegedRole,
    /// The lesson was completed before
    AlreadyCompleted,
    /// The quiz attempt budget is used up
    AttemptsExhausted,
}

/// Result of a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// Nothing was written
    Ignored {
        /// Why
        reason: IgnoreReason,
    },
    /// Progress was written
    Recorded {
        /// This call moved the lesson to completed
        transitioned: bool,
    },
}

impl CompletionOutcome {
    /// Whether this call completed the lesson.
    pub fn transitioned(&self) -> bool {
        matches!(self, CompletionOutcome::Recorded { transitioned: true })
    }
}

/// Records lesson transitions and drives the chapter and course cascade.
#[derive(Clone)]
pub struct LessonProgressTracker {
    access: AccessResolver,
    localization: Arc<dyn LocalizationResolver>,
    chapters: ChapterAggregator,
    courses: CourseCompletionEvaluator,
}

impl Default for LessonProgressTracker {
    fn default() -> Self {
        Self {
            access: AccessResolver::new(),
            localization: Arc::new(ContentLocalization),
            chapters: ChapterAggregator::new(),
            courses: CourseCompletionEvaluator::default(),
        }
    }
}

impl LessonProgressTracker {
    /// Create a tracker with the storage-backed collaborators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the localization resolver.
    pub fn with_localization(mut self, localization: Arc<dyn LocalizationResolver>) -> Self {
        self.localization = localization;
        self
    }

    /// Replace the certificate issuer.
    pub fn with_certificate_issuer(mut self, certificates: Arc<dyn CertificateIssuer>) -> Self {
        self.courses = self.courses.with_certificate_issuer(certificates);
        self
    }

    /// Replace the statistics repository.
    pub fn with_statistics(mut self, statistics: Arc<dyn StatisticsRepository>) -> Self {
        self.courses = self.courses.with_statistics(statistics);
        self
    }

    /// Record that a student opened a lesson.
    ///
    /// Returns whether anything was written.
    pub async fn mark_started(
        &self,
        tx: &mut dyn Transaction,
        lesson_id: LessonId,
        student_id: StudentId,
        role: Role,
    ) -> Result<bool> {
        if role.is_privileged() {
            debug!(%lesson_id, ?role, "Start ignored for privileged role");
            return Ok(false);
        }

        let access = self.access.resolve(tx, lesson_id, student_id).await?;
        access.ensure_allowed(student_id)?;
        if access.lesson_is_completed {
            return Ok(false);
        }

        let tracks_start = access.lesson_type.tracks_start();
        let now = chrono::Utc::now();
        match tx
            .load_lesson_progress(student_id, lesson_id, access.chapter_id)
            .await?
        {
            None => {
                let mut progress = LessonProgress::new(student_id, lesson_id, access.chapter_id);
                if tracks_start {
                    progress.is_started = true;
                    progress.started_at = Some(now);
                }
                tx.insert_lesson_progress(&progress).await?;
                debug!(%student_id, %lesson_id, "Lesson started");
                Ok(true)
            }
            Some(progress) if progress.is_started || !tracks_start => Ok(false),
            Some(mut progress) => {
                progress.is_started = true;
                progress.started_at = Some(now);
                progress.updated_at = now;
                tx.update_lesson_progress(&progress).await?;
                debug!(%student_id, %lesson_id, "Lesson started");
                Ok(true)
            }
        }
    }

    /// Record a completion request.
    ///
    /// Duplicate submits and exhausted quizzes are ignored, not rejected.
    /// Only the call whose conditional write sets `completed_at` runs the
    /// cascade and enqueues `LessonCompleted`.
    pub async fn mark_completed(
        &self,
        tx: &mut dyn Transaction,
        lesson_id: LessonId,
        student_id: StudentId,
        role: Role,
        context: &CompletionContext,
    ) -> Result<CompletionOutcome> {
        if role.is_privileged() {
            return Ok(CompletionOutcome::Ignored {
                reason: IgnoreReason::PrivilegedRole,
            });
        }

        let access = self.access.resolve(tx, lesson_id, student_id).await?;
        access.ensure_allowed(student_id)?;
        if access.lesson_is_completed {
            return Ok(CompletionOutcome::Ignored {
                reason: IgnoreReason::AlreadyCompleted,
            });
        }
        if access.attempts_exhausted() {
            debug!(%student_id, %lesson_id, attempts = access.attempts, "Completion ignored, attempts used up");
            return Ok(CompletionOutcome::Ignored {
                reason: IgnoreReason::AttemptsExhausted,
            });
        }

        let language = self
            .localization
            .base_language(tx, LocalizedEntity::Lesson(lesson_id), context.language.as_deref())
            .await?
            .language;

        let judgement = match access.lesson_type {
            LessonType::Quiz if !context.quiz_completed => {
                return Err(ProgressError::Validation(format!(
                    "quiz {} is not completed",
                    lesson_id
                )));
            }
            LessonType::AiMentor => Some(context.ai_mentor_judgement.as_ref().ok_or_else(|| {
                ProgressError::Validation(format!(
                    "AI mentor lesson {} has no judgement",
                    lesson_id
                ))
            })?),
            _ => None,
        };

        let progress = self
            .upsert_completion_row(tx, &access, student_id, context, &language)
            .await?;

        if let Some(judgement) = judgement {
            self.record_judgement(tx, progress.id, judgement).await?;
        }

        let should_update = progress.completed_at.is_none()
            && match access.lesson_type {
                LessonType::Quiz => context.is_quiz_passed,
                LessonType::AiMentor => judgement.is_some_and(|j| j.passed),
                _ => true,
            };
        if !should_update {
            return Ok(CompletionOutcome::Recorded {
                transitioned: false,
            });
        }

        let transitioned = tx
            .mark_lesson_completed(progress.id, chrono::Utc::now())
            .await?;
        if transitioned {
            self.cascade(tx, &access, student_id, &language).await?;
        }
        Ok(CompletionOutcome::Recorded { transitioned })
    }

    /// Write a quiz attempt with a caller supplied counter.
    ///
    /// The only path that may clear a completion. Returns whether the lesson
    /// moved from not completed to completed, in which case the cascade runs.
    pub async fn update_quiz_progress(
        &self,
        tx: &mut dyn Transaction,
        update: &QuizProgressUpdate,
    ) -> Result<bool> {
        let access = self
            .access
            .resolve(tx, update.lesson_id, update.student_id)
            .await?;
        access.ensure_allowed(update.student_id)?;
        if access.chapter_id != update.chapter_id {
            return Err(ProgressError::Validation(format!(
                "lesson {} does not belong to chapter {}",
                update.lesson_id, update.chapter_id
            )));
        }

        let language = self
            .localization
            .base_language(
                tx,
                LocalizedEntity::Lesson(update.lesson_id),
                update.language_answered.as_deref(),
            )
            .await?
            .language;

        let now = chrono::Utc::now();
        let existing = tx
            .load_lesson_progress(update.student_id, update.lesson_id, update.chapter_id)
            .await?;
        let is_new = existing.is_none();
        let mut progress = existing.unwrap_or_else(|| {
            LessonProgress::new(update.student_id, update.lesson_id, update.chapter_id)
        });
        let was_completed = progress.is_completed();

        progress.completed_question_count = update.completed_question_count;
        progress.quiz_score = Some(update.quiz_score);
        progress.attempts = progress.attempts.max(update.attempts);
        progress.is_quiz_passed = Some(update.is_quiz_passed);
        progress.language_answered = Some(language.clone());
        progress.completed_at = if update.is_completed {
            progress.completed_at.or(Some(now))
        } else {
            None
        };
        progress.updated_at = now;

        if is_new {
            tx.insert_lesson_progress(&progress).await?;
        } else {
            tx.update_lesson_progress(&progress).await?;
        }
        debug!(
            student_id = %update.student_id,
            lesson_id = %update.lesson_id,
            attempts = progress.attempts,
            completed = update.is_completed,
            "Quiz progress updated"
        );

        let transitioned = !was_completed && update.is_completed;
        if transitioned {
            self.cascade(tx, &access, update.student_id, &language).await?;
        }
        Ok(transitioned)
    }

    async fn upsert_completion_row(
        &self,
        tx: &mut dyn Transaction,
        access: &LessonAccess,
        student_id: StudentId,
        context: &CompletionContext,
        language: &str,
    ) -> Result<LessonProgress> {
        let lesson_id = access.lesson.id;
        let existing = tx
            .load_lesson_progress(student_id, lesson_id, access.chapter_id)
            .await?;
        let is_new = existing.is_none();
        let mut progress = existing
            .unwrap_or_else(|| LessonProgress::new(student_id, lesson_id, access.chapter_id));

        progress.completed_question_count = context.completed_question_count;
        if access.lesson_type == LessonType::Quiz {
            progress.is_quiz_passed = Some(context.is_quiz_passed);
            progress.language_answered = Some(language.to_string());
        }
        progress.updated_at = chrono::Utc::now();

        if is_new {
            tx.insert_lesson_progress(&progress).await?;
        } else {
            tx.update_lesson_progress(&progress).await?;
        }
        Ok(progress)
    }

    async fn record_judgement(
        &self,
        tx: &mut dyn Transaction,
        progress_id: ProgressId,
        judgement: &AiMentorJudgement,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        let record = match tx.load_ai_mentor_record(progress_id).await? {
            Some(mut record) => {
                record.judgement = judgement.clone();
                record.updated_at = now;
                record
            }
            None => AiMentorRecord {
                progress_id,
                judgement: judgement.clone(),
                created_at: now,
                updated_at: now,
            },
        };
        tx.save_ai_mentor_record(&record).await?;
        Ok(())
    }

    async fn cascade(
        &self,
        tx: &mut dyn Transaction,
        access: &LessonAccess,
        student_id: StudentId,
        language: &str,
    ) -> Result<()> {
        let lesson_id = access.lesson.id;
        info!(%student_id, %lesson_id, course_id = %access.course_id, "Lesson completed");
        tx.enqueue_event(&Event::new(
            ActorId::student(student_id),
            DomainEvent::LessonCompleted {
                student_id,
                course_id: access.course_id,
                lesson_id,
            },
        ))
        .await?;

        let as_freemium = access.is_freemium_only();
        self.chapters
            .recompute(
                tx,
                access.course_id,
                access.chapter_id,
                student_id,
                access.chapter_lesson_count,
                as_freemium,
            )
            .await?;

        if as_freemium {
            debug!(%student_id, %lesson_id, "Freemium completion, course left untouched");
            return Ok(());
        }

        self.courses
            .evaluate(tx, access.course_id, student_id, language)
            .await?;
        Ok(())
    }
}
