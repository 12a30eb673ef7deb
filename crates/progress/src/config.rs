//! Progress engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::ProgressService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Dispatch the outbox right after every successful commit
    pub dispatch_after_commit: bool,
    /// Max outbox events handed to the publisher per batch
    pub outbox_batch_size: usize,
    /// Hours a dispatched outbox event is kept before pruning
    pub outbox_retention_hours: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            dispatch_after_commit: true,
            outbox_batch_size: 100,
            outbox_retention_hours: 168,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ProgressConfig = serde_json::from_str(r#"{"outbox_batch_size": 5}"#).unwrap();
        assert_eq!(config.outbox_batch_size, 5);
        assert!(config.dispatch_after_commit);
        assert_eq!(config.outbox_retention_hours, 168);
    }
}
