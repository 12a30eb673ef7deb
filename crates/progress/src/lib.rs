//! Progress Tracking (Layer 3)
//!
//! Lesson completion, the chapter and course cascade, and the outbox that
//! publishes what happened once it is committed.
//!
//! A request flows through [`ProgressService`]: the [`LessonProgressTracker`]
//! records the lesson transition, the [`ChapterAggregator`] recounts the
//! chapter and the [`CourseCompletionEvaluator`] recounts the course. Every
//! step shares the same [`lessonflow_storage::Transaction`].

#![warn(missing_docs)]

pub mod access;
pub mod certificate;
pub mod chapter;
pub mod config;
pub mod course;
pub mod error;
pub mod localization;
pub mod publisher;
pub mod retake;
pub mod service;
pub mod statistics;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use access::{AccessResolver, LessonAccess};
pub use certificate::{CertificateIssuer, StorageCertificateIssuer};
pub use chapter::ChapterAggregator;
pub use config::ProgressConfig;
pub use course::{CourseCompletionEvaluator, CourseEvaluation};
pub use error::{ProgressError, Result};
pub use localization::{
    ContentLocalization, LanguageResolution, LocalizationResolver, LocalizedEntity,
};
pub use publisher::{EventPublisher, OutboxDispatcher, TracingEventPublisher};
pub use retake::{RetakeDecision, RetakePolicy};
pub use service::{ProgressService, StudentProgressReport};
pub use statistics::{StatisticsRepository, StorageStatistics};
pub use tracker::{
    CompletionContext, CompletionOutcome, IgnoreReason, LessonProgressTracker, QuizProgressUpdate,
};
