//! Chapter aggregation.

use lessonflow_core::{ActorId, ChapterId, ChapterProgress, CourseId, DomainEvent, Event, StudentId};
use lessonflow_storage::{StorageError, Transaction};
use tracing::{debug, info};

use crate::error::Result;

/// Recomputes a student's chapter progress from completed lessons.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChapterAggregator;

impl ChapterAggregator {
    /// Create a new aggregator.
    pub fn new() -> Self {
        Self
    }

    /// Recount completed lessons and refresh the chapter row.
    ///
    /// Safe to call any number of times. The chapter is marked finished,
    /// and `ChapterFinished` enqueued, only on the first recompute that
    /// sees every lesson completed. A finished chapter stays finished.
    pub async fn recompute(
        &self,
        tx: &mut dyn Transaction,
        course_id: CourseId,
        chapter_id: ChapterId,
        student_id: StudentId,
        lesson_count: u32,
        completed_as_freemium: bool,
    ) -> Result<ChapterProgress> {
        let completed = tx.count_completed_lessons(student_id, chapter_id).await?;
        tx.upsert_chapter_progress(
            student_id,
            chapter_id,
            course_id,
            completed,
            completed_as_freemium,
        )
        .await?;
        debug!(%student_id, %chapter_id, completed, lesson_count, "Chapter recomputed");

        if completed == lesson_count
            && tx
                .mark_chapter_completed(student_id, chapter_id, chrono::Utc::now())
                .await?
        {
            info!(%student_id, %chapter_id, %course_id, completed_as_freemium, "Chapter finished");
            tx.enqueue_event(&Event::new(
                ActorId::student(student_id),
                DomainEvent::ChapterFinished {
                    chapter_id,
                    course_id,
                    student_id,
                },
            ))
            .await?;
        }

        let progress = tx
            .load_chapter_progress(student_id, chapter_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("chapter progress {}", chapter_id)))?;
        Ok(progress)
    }
}
