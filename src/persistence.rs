// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync state persistence.
//!
//! Only sync metadata is ever written: when the last successful sync
//! happened and which strategy was in force. [`SyncState`] has no field
//! that can carry payload content, and decoding rejects unknown fields, so a
//! blob that picked up anything else is treated as corrupt and wiped.
//!
//! Loading never fails. Missing, unreadable, corrupt or expired state all
//! come back as [`SyncState::default()`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::event::now_millis;
use crate::storage::traits::{KeyValueStore, StorageError};
use crate::strategy::SyncStrategy;

/// The persisted snapshot. Metadata only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncState {
    /// Epoch millis of the last successful remote sync
    pub last_sync_timestamp: Option<u64>,
    pub strategy: SyncStrategy,
}

impl SyncState {
    /// Whether this state is older than `retention` at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64, retention: Duration) -> bool {
        match self.last_sync_timestamp {
            Some(ts) => now_ms.saturating_sub(ts) > crate::metrics::duration_ms(retention),
            None => false,
        }
    }
}

/// Single writer for the engine's durable state.
pub struct StatePersistence {
    store: Arc<dyn KeyValueStore>,
    key: String,
    retention: Duration,
}

impl StatePersistence {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, retention: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            retention,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serialize and store `state`. Failures are logged, not returned.
    pub async fn save(&self, state: &SyncState) -> bool {
        match self.try_save(state).await {
            Ok(()) => {
                debug!(key = %self.key, strategy = %state.strategy, "Sync state saved");
                crate::metrics::record_state_persist("save", true);
                true
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to save sync state");
                crate::metrics::record_state_persist("save", false);
                false
            }
        }
    }

    async fn try_save(&self, state: &SyncState) -> Result<(), StorageError> {
        let blob = serde_json::to_string(state).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.store.set_item(&self.key, &blob).await
    }

    /// Load the stored state, falling back to defaults.
    pub async fn load(&self) -> SyncState {
        let raw = match self.store.get_item(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %self.key, "No persisted sync state, using defaults");
                return SyncState::default();
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read sync state, using defaults");
                crate::metrics::record_state_persist("load", false);
                return SyncState::default();
            }
        };

        let state = match decode(&self.key, &raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Persisted sync state is corrupt, resetting");
                crate::metrics::record_state_corrupt();
                self.remove().await;
                return SyncState::default();
            }
        };

        if state.is_expired(now_millis(), self.retention) {
            info!(
                key = %self.key,
                retention_secs = self.retention.as_secs(),
                "Persisted sync state past retention, pruning"
            );
            self.remove().await;
            return SyncState::default();
        }

        crate::metrics::record_state_persist("load", true);
        state
    }

    /// Delete the stored state.
    pub async fn remove(&self) -> bool {
        match self.store.remove_item(&self.key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to remove sync state");
                crate::metrics::record_state_persist("remove", false);
                false
            }
        }
    }
}

fn decode(key: &str, raw: &str) -> Result<SyncState, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
