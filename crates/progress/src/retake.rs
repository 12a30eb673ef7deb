//! Quiz retake policy.

use chrono::Duration;
use lessonflow_core::{Lesson, LessonProgress, LessonType, Time};
use serde::Serialize;

/// Whether a student may take a quiz again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetakeDecision {
    /// A new attempt may be recorded with this counter
    Allowed {
        /// Value to pass as `attempts` to the quiz progress update
        next_attempt: u32,
    },
    /// The lesson is not a quiz
    NotAQuiz,
    /// The quiz is already passed
    AlreadyPassed,
    /// Every allowed attempt was used
    AttemptsExhausted {
        /// Configured limit
        limit: u32,
    },
    /// The last attempt is too recent
    CoolingDown {
        /// Earliest time of the next attempt
        until: Time,
    },
}

impl RetakeDecision {
    /// Whether another attempt may be recorded.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RetakeDecision::Allowed { .. })
    }
}

/// Computes the caller-side retake counter from the lesson's limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetakePolicy;

impl RetakePolicy {
    /// Evaluate whether `progress` allows another attempt at `lesson`.
    pub fn evaluate(
        &self,
        lesson: &Lesson,
        progress: Option<&LessonProgress>,
        now: Time,
    ) -> RetakeDecision {
        if lesson.lesson_type != LessonType::Quiz {
            return RetakeDecision::NotAQuiz;
        }

        let Some(progress) = progress else {
            return RetakeDecision::Allowed { next_attempt: 1 };
        };

        if progress.is_completed() && progress.is_quiz_passed == Some(true) {
            return RetakeDecision::AlreadyPassed;
        }

        if let Some(limit) = lesson.attempts_limit {
            if progress.attempts >= limit {
                return RetakeDecision::AttemptsExhausted { limit };
            }
        }

        // No attempt yet means nothing to cool down from.
        if progress.attempts > 0 {
            if let Some(hours) = lesson.quiz_cooldown_hours {
                let until = progress.updated_at + Duration::hours(i64::from(hours));
                if until > now {
                    return RetakeDecision::CoolingDown { until };
                }
            }
        }

        RetakeDecision::Allowed {
            next_attempt: progress.attempts + 1,
        }
    }
}
