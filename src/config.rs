// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the content sync engine.
//!
//! # Example
//!
//! ```
//! use content_sync::SyncEngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncEngineConfig::default();
//! assert_eq!(config.max_failures, 3);
//! assert_eq!(config.reset_timeout_ms, 60_000);
//!
//! // Override a few knobs
//! let config = SyncEngineConfig {
//!     dispatch_timeout_ms: 2_000,
//!     queue_capacity: Some(500),
//!     ..Default::default()
//! };
//! assert_eq!(config.queue_capacity, Some(500));
//! ```

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors raised by [`SyncEngineConfig::from_json_str`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Configuration for the sync engine.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncEngineConfig {
    /// Consecutive remote failures before the breaker opens
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// How long the breaker stays open before the next check closes it
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Upper bound on a single remote dispatch
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Pending queue bound (`None` = unbounded). Oldest entries are dropped on overflow.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: Option<usize>,

    /// Background drain tick (0 = disabled, drain only on reconnect/status/sync)
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Max entries replayed per drain pass
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,

    /// Storage key for the persisted sync state
    #[serde(default = "default_state_key")]
    pub state_key: String,

    /// Persisted state older than this is pruned on load
    #[serde(default = "default_state_retention_days")]
    pub state_retention_days: u32,

    /// Feature flag that enables realtime push
    #[serde(default = "default_realtime_flag")]
    pub realtime_flag: String,

    /// Transport channel content changes are sent on
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_max_failures() -> u32 { 3 }
fn default_reset_timeout_ms() -> u64 { 60_000 }
fn default_dispatch_timeout_ms() -> u64 { 5_000 }
fn default_queue_capacity() -> Option<usize> { Some(1_000) }
fn default_drain_interval_ms() -> u64 { 5_000 }
fn default_drain_batch_size() -> usize { 100 }
fn default_state_key() -> String { "content_sync_state".to_string() }
fn default_state_retention_days() -> u32 { 30 }
fn default_realtime_flag() -> String { "realtime_sync_enabled".to_string() }
fn default_channel() -> String { "content-sync".to_string() }

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            reset_timeout_ms: default_reset_timeout_ms(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            drain_interval_ms: default_drain_interval_ms(),
            drain_batch_size: default_drain_batch_size(),
            state_key: default_state_key(),
            state_retention_days: default_state_retention_days(),
            realtime_flag: default_realtime_flag(),
            channel: default_channel(),
        }
    }
}

impl SyncEngineConfig {
    /// Parse a config from JSON and validate it.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_failures == 0 {
            return Err(ConfigError::Invalid {
                field: "max_failures",
                reason: "must be at least 1",
            });
        }
        if self.dispatch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch_timeout_ms",
                reason: "must be non-zero",
            });
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "use null for unbounded, not 0",
            });
        }
        if self.drain_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "drain_batch_size",
                reason: "must be at least 1",
            });
        }
        if self.state_key.is_empty() {
            return Err(ConfigError::Invalid {
                field: "state_key",
                reason: "must not be empty",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// `None` when the background drain ticker is disabled.
    #[must_use]
    pub fn drain_interval(&self) -> Option<Duration> {
        (self.drain_interval_ms > 0).then(|| Duration::from_millis(self.drain_interval_ms))
    }

    #[must_use]
    pub fn state_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.state_retention_days) * 24 * 60 * 60)
    }
}
