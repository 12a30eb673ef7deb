//! Certificate issuance.

use async_trait::async_trait;
use lessonflow_core::{Certificate, CertificateId, CourseId, StudentId};
use lessonflow_storage::{StorageError, Transaction};
use tracing::info;

use crate::error::Result;

/// Creates the certificate for a finished course.
///
/// Implementations must be idempotent for a `(student, course)` pair.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Issue (or return the already issued) certificate.
    async fn create_certificate(
        &self,
        tx: &mut dyn Transaction,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Certificate>;
}

/// Issuer writing certificates through the progress transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageCertificateIssuer;

#[async_trait]
impl CertificateIssuer for StorageCertificateIssuer {
    async fn create_certificate(
        &self,
        tx: &mut dyn Transaction,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Certificate> {
        if let Some(existing) = tx.load_certificate(student_id, course_id).await? {
            return Ok(existing);
        }

        let certificate = Certificate {
            id: CertificateId::new(),
            student_id,
            course_id,
            issued_at: chrono::Utc::now(),
        };
        match tx.insert_certificate(&certificate).await {
            Ok(()) => {
                info!(%student_id, %course_id, certificate_id = %certificate.id, "Certificate issued");
                Ok(certificate)
            }
            // Lost a race with another writer: hand back the winner.
            Err(StorageError::Conflict(_)) => Ok(tx
                .load_certificate(student_id, course_id)
                .await?
                .unwrap_or(certificate)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessonflow_storage::{MemoryStorage, Storage};

    #[tokio::test]
    async fn test_issuing_twice_returns_same_certificate() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let (student, course) = (StudentId::new(), CourseId::new());

        let first = StorageCertificateIssuer
            .create_certificate(tx.as_mut(), student, course)
            .await
            .unwrap();
        let second = StorageCertificateIssuer
            .create_certificate(tx.as_mut(), student, course)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
    }
}
