//! Public types for the sync engine coordinator.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::metrics::SyncMetrics;
use crate::strategy::SyncStrategy;
use crate::transport::TransportError;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet initialized
    Created,
    /// Loading state and connecting the transport
    Initializing,
    /// Accepting content changes
    Running,
    /// Torn down by `destroy()`; may be initialized again
    Destroyed,
}

impl EngineState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Initializing => "Initializing",
            Self::Running => "Running",
            Self::Destroyed => "Destroyed",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a remote dispatch did not land.
///
/// None of these reach the caller of `sync_content_change`; they feed the
/// circuit breaker and the pending queue.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("transport unavailable")]
    TransportUnavailable,

    #[error("remote dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to encode sync event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => Self::TransportUnavailable,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Snapshot returned by [`super::SyncEngine::get_status()`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_initialized: bool,
    pub strategy: SyncStrategy,
    pub queue_size: usize,
    pub metrics: SyncMetrics,
    pub circuit_open: bool,
    pub transport_connected: bool,
}

/// Outcome of one [`super::SyncEngine::drain_queue()`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries replayed successfully
    pub drained: usize,
    /// Entries still queued afterwards
    pub remaining: usize,
    /// Queue was emptied (false when interrupted or skipped)
    pub completed: bool,
}

/// How a single dispatch attempt ended.
#[derive(Debug)]
pub(super) enum Attempt {
    Synced,
    /// Remote push failed; the entry still needs delivering
    Failed,
    /// Engine was destroyed while the dispatch was in flight
    Stale,
}
