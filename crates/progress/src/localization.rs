//! Language resolution for recorded progress.

use async_trait::async_trait;
use lessonflow_core::LessonId;
use lessonflow_storage::Transaction;

use crate::error::{ProgressError, Result};

/// An entity that carries translated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalizedEntity {
    /// A lesson
    Lesson(LessonId),
}

/// The language to record for an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageResolution {
    /// Language the entity was authored in
    pub base_language: String,
    /// Language to actually record
    pub language: String,
    /// Languages the entity is available in
    pub available_locales: Vec<String>,
}

impl LanguageResolution {
    /// Pick `preferred` when it is available, otherwise the base language.
    pub fn pick(
        base_language: String,
        available_locales: Vec<String>,
        preferred: Option<&str>,
    ) -> Self {
        let language = match preferred {
            Some(lang) if lang == base_language || available_locales.iter().any(|l| l == lang) => {
                lang.to_string()
            }
            _ => base_language.clone(),
        };
        Self {
            base_language,
            language,
            available_locales,
        }
    }
}

/// Resolves which language a student's progress is recorded in.
#[async_trait]
pub trait LocalizationResolver: Send + Sync {
    /// Resolve the language of `entity` for a caller preferring `preferred`.
    async fn base_language(
        &self,
        tx: &mut dyn Transaction,
        entity: LocalizedEntity,
        preferred: Option<&str>,
    ) -> Result<LanguageResolution>;
}

/// Resolver backed by the content records in storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentLocalization;

#[async_trait]
impl LocalizationResolver for ContentLocalization {
    async fn base_language(
        &self,
        tx: &mut dyn Transaction,
        entity: LocalizedEntity,
        preferred: Option<&str>,
    ) -> Result<LanguageResolution> {
        match entity {
            LocalizedEntity::Lesson(id) => {
                let lesson = tx
                    .load_lesson(id)
                    .await?
                    .ok_or_else(|| ProgressError::NotFound(format!("lesson {}", id)))?;
                Ok(LanguageResolution::pick(
                    lesson.base_language,
                    lesson.available_locales,
                    preferred,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChapterShape, Fixture};

    fn locales() -> Vec<String> {
        vec!["en".to_string(), "pl".to_string()]
    }

    #[test]
    fn test_pick_available_language() {
        let resolution = LanguageResolution::pick("en".to_string(), locales(), Some("pl"));
        assert_eq!(resolution.language, "pl");
        assert_eq!(resolution.base_language, "en");
    }

    #[test]
    fn test_pick_falls_back_to_base() {
        let resolution = LanguageResolution::pick("en".to_string(), locales(), Some("de"));
        assert_eq!(resolution.language, "en");

        let resolution = LanguageResolution::pick("en".to_string(), locales(), None);
        assert_eq!(resolution.language, "en");
    }

    #[tokio::test]
    async fn test_content_localization_reads_the_lesson() {
        let fx = Fixture::memory(&[ChapterShape::content(1)], false, true).await;
        let lesson = LocalizedEntity::Lesson(fx.lessons[0].id);
        let mut tx = fx.storage.begin().await.unwrap();

        let resolution = ContentLocalization
            .base_language(tx.as_mut(), lesson, Some("pl"))
            .await
            .unwrap();
        assert_eq!(resolution.language, "pl");
        assert_eq!(resolution.available_locales, locales());

        let missing = LocalizedEntity::Lesson(LessonId::new());
        let err = ContentLocalization
            .base_language(tx.as_mut(), missing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::NotFound(_)));
        tx.rollback().await.unwrap();
    }
}
