//! Client configuration, loadable from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fraction of subscription capacity that must be freed before a
/// credit replenishment request is sent.
pub const REPLENISHMENT_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Lock owner used when a subscription does not set its own.
    pub default_lock_owner: String,
    /// Upper bound on every control and command request, milliseconds.
    pub request_timeout_ms: u64,
    /// Number of job execution workers shared by all subscriptions.
    pub num_execution_workers: usize,
    /// Default subscription capacity (initial credit grant).
    pub default_fetch_size: u32,
    /// How often a broken subscription is re-opened before giving up.
    pub reopen_attempts: u32,
    /// Delay between reopen attempts, milliseconds.
    pub reopen_delay_ms: u64,
    /// Minimum interval between timeout-triggered topology refreshes,
    /// milliseconds.
    pub topology_refresh_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_lock_owner: "default".to_string(),
            request_timeout_ms: 15_000,
            num_execution_workers: 1,
            default_fetch_size: 32,
            reopen_attempts: 3,
            reopen_delay_ms: 500,
            topology_refresh_interval_ms: 5_000,
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }

    pub fn topology_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.topology_refresh_interval_ms)
    }
}
