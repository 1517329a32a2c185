//! Queue types for blobq
//!
//! Defines queue settings and reporting types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Prefix for generated storage keys, narrowing the collision domain
    #[serde(default = "default_key_namespace")]
    pub key_namespace: String,

    /// Age after which a claim is considered abandoned and eligible for repair
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,

    /// How many fresh keys to try when a backend reports a collision
    #[serde(default = "default_max_key_attempts")]
    pub max_key_attempts: u32,
}

fn default_key_namespace() -> String {
    "default".to_string()
}

fn default_claim_timeout() -> u64 {
    300 // 5 minutes
}

fn default_max_key_attempts() -> u32 {
    5
}

impl QueueSettings {
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            key_namespace: default_key_namespace(),
            claim_timeout_secs: default_claim_timeout(),
            max_key_attempts: default_max_key_attempts(),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    /// Messages waiting to be dequeued
    pub available: u64,

    /// Messages held by an in-flight or interrupted dequeue
    pub claimed: u64,
}

/// Outcome of one repair pass over abandoned claims
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Claims whose blob still existed, returned to the queue
    pub released: u64,

    /// Claims whose blob was already gone, record deleted
    pub removed: u64,

    /// Claims that could not be repaired this pass
    pub failed: u64,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.released == 0 && self.removed == 0 && self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = QueueSettings::default();
        assert_eq!(settings.key_namespace, "default");
        assert_eq!(settings.claim_timeout(), Duration::from_secs(300));
        assert_eq!(settings.max_key_attempts, 5);
    }

    #[test]
    fn test_settings_partial_override() {
        let settings: QueueSettings =
            serde_json::from_str(r#"{"claim_timeout_secs": 30}"#).unwrap();
        assert_eq!(settings.claim_timeout_secs, 30);
        assert_eq!(settings.key_namespace, "default");
    }
}
