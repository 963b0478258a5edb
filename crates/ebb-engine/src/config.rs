use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;

/// Configuration for the sync engine.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transient failures tolerated before an event is escalated to
    /// `Failed`.
    pub max_attempts: u32,
    /// Bound on a single submission attempt; overruns count as transient
    /// failures.
    pub submit_timeout: Duration,
    /// Backoff between retries of the same event.
    pub backoff: BackoffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            submit_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}
