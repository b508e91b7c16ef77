use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Tuning knobs for ingest, matching and bundle assembly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Attempts per blob fetch during assembly, including the first
    pub fetch_attempts: u32,
    /// Base delay between fetch attempts; attempt `n` waits `n - 1` times this
    pub retry_backoff_ms: u64,
    /// Exists calls in flight at once while matching
    pub match_concurrency: usize,
    /// Directory for spool files and assembled archives (system temp dir if unset)
    pub temp_dir: Option<PathBuf>,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            retry_backoff_ms: 100,
            match_concurrency: 8,
            temp_dir: None,
        }
    }
}

impl StashConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
