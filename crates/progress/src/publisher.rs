//! Event publishing and the outbox dispatcher.
//!
//! Events reach an [`EventPublisher`] only after the transaction that
//! enqueued them committed.

use std::sync::Arc;

use async_trait::async_trait;
use lessonflow_core::{DomainEvent, Event};
use lessonflow_storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Consumer of committed domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver one event.
    async fn publish(&self, event: &Event) -> Result<()>;
}

/// Publisher that writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: &Event) -> Result<()> {
        match &event.payload {
            DomainEvent::LessonCompleted {
                student_id,
                course_id,
                lesson_id,
            } => {
                info!(event_id = %event.id, %student_id, %course_id, %lesson_id, "Lesson completed");
            }
            DomainEvent::ChapterFinished {
                chapter_id,
                course_id,
                student_id,
            } => {
                info!(event_id = %event.id, %student_id, %course_id, %chapter_id, "Chapter finished");
            }
            DomainEvent::CourseCompleted {
                student_id,
                course_id,
                language,
                certificate_issued,
                ..
            } => {
                info!(
                    event_id = %event.id,
                    %student_id,
                    %course_id,
                    %language,
                    certificate_issued,
                    "Course completed"
                );
            }
            DomainEvent::UserCourseFinished {
                user_id,
                course_id,
                actor,
            } => {
                info!(event_id = %event.id, %user_id, %course_id, %actor, "User finished course");
            }
        }
        Ok(())
    }
}

/// Moves committed outbox records to a publisher.
pub struct OutboxDispatcher {
    storage: Arc<dyn Storage>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: usize,
    // Serializes dispatch runs so an event is not handed over twice concurrently.
    lock: Mutex<()>,
}

impl OutboxDispatcher {
    /// Create a new dispatcher.
    pub fn new(
        storage: Arc<dyn Storage>,
        publisher: Arc<dyn EventPublisher>,
        batch_size: usize,
    ) -> Self {
        Self {
            storage,
            publisher,
            batch_size: batch_size.max(1),
            lock: Mutex::new(()),
        }
    }

    /// Publish every pending event in insertion order.
    ///
    /// Stops at the first publish failure. Events delivered before it are
    /// marked dispatched, the rest stay pending for the next run.
    pub async fn dispatch_pending(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut total = 0;

        loop {
            let batch = self.storage.pending_events(self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            let mut delivered = Vec::with_capacity(batch_len);
            let mut failure = None;
            for event in &batch {
                match self.publisher.publish(event).await {
                    Ok(()) => delivered.push(event.id),
                    Err(e) => {
                        warn!(event_id = %event.id, event = event.payload.name(), error = %e, "Publish failed");
                        failure = Some(e);
                        break;
                    }
                }
            }

            if !delivered.is_empty() {
                self.storage.mark_events_dispatched(&delivered).await?;
            }
            total += delivered.len();

            if let Some(e) = failure {
                return Err(e);
            }
            if batch_len < self.batch_size {
                break;
            }
        }

        if total > 0 {
            debug!(count = total, "Outbox dispatched");
        }
        Ok(total)
    }
}
