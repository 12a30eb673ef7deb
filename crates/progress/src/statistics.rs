//! Course completion counters.

use async_trait::async_trait;
use lessonflow_core::{CourseId, CourseStat};
use lessonflow_storage::Transaction;

use crate::error::Result;

/// Counters bumped when a course is completed.
#[async_trait]
pub trait StatisticsRepository: Send + Sync {
    /// Count a completion of a course that grants a certificate.
    async fn update_completed_as_freemium_courses_stats(
        &self,
        tx: &mut dyn Transaction,
        course_id: CourseId,
    ) -> Result<()>;

    /// Count a completion of a course without a certificate.
    async fn update_paid_purchased_courses_stats(
        &self,
        tx: &mut dyn Transaction,
        course_id: CourseId,
    ) -> Result<()>;
}

/// Counters kept in the progress store.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageStatistics;

#[async_trait]
impl StatisticsRepository for StorageStatistics {
    async fn update_completed_as_freemium_courses_stats(
        &self,
        tx: &mut dyn Transaction,
        course_id: CourseId,
    ) -> Result<()> {
        tx.increment_course_stat(course_id, CourseStat::CompletedAsFreemium)
            .await?;
        Ok(())
    }

    async fn update_paid_purchased_courses_stats(
        &self,
        tx: &mut dyn Transaction,
        course_id: CourseId,
    ) -> Result<()> {
        tx.increment_course_stat(course_id, CourseStat::PaidPurchased)
            .await?;
        Ok(())
    }
}
