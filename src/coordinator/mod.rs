// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] is the façade the content layer talks to. It ties
//! together:
//! - the event bus for same-process subscribers
//! - the circuit breaker gating remote dispatch
//! - the pending queue of deferred changes
//! - the metrics recorder
//! - state persistence through a [`KeyValueStore`]
//!
//! # Lifecycle
//!
//! ```text
//! Created → Initializing → Running → Destroyed (→ Initializing ...)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use content_sync::{SyncEngine, SyncEngineConfig, SyncDeps, SyncEventKind, SyncOptions};
//! use content_sync::{InProcessHub, MemoryStore, StaticFlags};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let hub = InProcessHub::new();
//! let deps = SyncDeps {
//!     transport: Arc::new(hub.transport()),
//!     store: Arc::new(MemoryStore::new()),
//!     flags: Arc::new(StaticFlags::new().with("realtime_sync_enabled", true)),
//! };
//! let engine = Arc::new(SyncEngine::new(SyncEngineConfig::default(), deps));
//! engine.initialize().await;
//!
//! let synced = engine
//!     .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "42"}), SyncOptions::default())
//!     .await;
//! assert!(synced);
//! # }
//! ```

mod types;
mod api;
mod drain;
mod lifecycle;

pub use types::{DrainReport, EngineState, SyncError, SyncStatus};

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::bus::{EventBus, SubscriberError, Subscription};
use crate::config::SyncEngineConfig;
use crate::event::SyncEvent;
use crate::event::SyncEventKind;
use crate::flags::FeatureFlags;
use crate::metrics::{MetricsRecorder, SyncMetrics};
use crate::persistence::{StatePersistence, SyncState};
use crate::queue::PendingQueue;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitConfig, CircuitState};
use crate::resilience::retry::RetryConfig;
use crate::storage::traits::KeyValueStore;
use crate::strategy::SyncStrategy;
use crate::transport::Transport;

/// External collaborators, owned by the composition root.
#[derive(Clone)]
pub struct SyncDeps {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn KeyValueStore>,
    pub flags: Arc<dyn FeatureFlags>,
}

/// Main sync engine coordinator.
///
/// # Thread Safety
///
/// The engine is `Send + Sync` and meant to be shared as `Arc<SyncEngine>`.
/// Breaker and queue transitions each happen under their own mutex, and
/// metrics are updated under one lock so the sum invariant always holds.
pub struct SyncEngine {
    pub(super) config: SyncEngineConfig,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Bumped by `destroy()`; in-flight work compares it after awaiting
    pub(super) epoch: AtomicU64,

    pub(super) transport: Arc<dyn Transport>,
    pub(super) flags: Arc<dyn FeatureFlags>,
    pub(super) persistence: StatePersistence,

    pub(super) bus: EventBus,
    pub(super) breaker: CircuitBreaker,
    pub(super) queue: PendingQueue,
    pub(super) metrics: MetricsRecorder,

    pub(super) strategy: RwLock<SyncStrategy>,

    /// Epoch millis of the last successful remote sync
    pub(super) last_sync: Mutex<Option<u64>>,

    /// Held for the duration of a drain pass
    pub(super) drain_lock: tokio::sync::Mutex<()>,

    /// Backoff for the transport connect in `initialize()`
    pub(super) connect_retry: RetryConfig,

    /// Set by `initialize()` so background drains can be spawned from `&self`
    pub(super) self_ref: Mutex<Weak<SyncEngine>>,

    /// Connection watcher, inbound forwarder, drain ticker
    pub(super) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Create a new engine. Nothing connects until [`initialize()`](Self::initialize).
    pub fn new(config: SyncEngineConfig, deps: SyncDeps) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let persistence = StatePersistence::new(
            deps.store,
            config.state_key.clone(),
            config.state_retention(),
        );

        Self {
            breaker: CircuitBreaker::new("remote_sync", CircuitConfig::from(&config)),
            queue: PendingQueue::new(config.queue_capacity),
            state: state_tx,
            state_rx,
            epoch: AtomicU64::new(0),
            transport: deps.transport,
            flags: deps.flags,
            persistence,
            bus: EventBus::new(),
            metrics: MetricsRecorder::new(),
            strategy: RwLock::new(SyncStrategy::default()),
            last_sync: Mutex::new(None),
            drain_lock: tokio::sync::Mutex::new(()),
            connect_retry: RetryConfig::startup(),
            self_ref: Mutex::new(Weak::new()),
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Override the transport connect backoff used by `initialize()`.
    #[must_use]
    pub fn with_connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state() == EngineState::Running
    }

    #[must_use]
    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    pub(super) fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(state.as_str());
    }

    pub(super) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Subscribers
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register `callback` for events of `kind`, local or remote-origin.
    pub fn subscribe<F>(&self, kind: SyncEventKind, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, callback)
    }

    /// The engine's event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Circuit breaker
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a remote-sync failure against the breaker.
    pub fn handle_sync_error(&self, error: &dyn std::fmt::Display) -> CircuitState {
        self.breaker.handle_sync_error(error)
    }

    /// Whether remote attempts are allowed. Closes an expired open breaker.
    #[must_use]
    pub fn is_circuit_breaker_closed(&self) -> bool {
        self.breaker.is_closed()
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.breaker.snapshot()
    }

    /// Direct access to the breaker, for operators forcing it open or closed.
    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Status
    // ═══════════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn metrics(&self) -> SyncMetrics {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn strategy(&self) -> SyncStrategy {
        *self.strategy.read()
    }

    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Epoch millis of the last successful remote sync.
    #[must_use]
    pub fn last_sync_timestamp(&self) -> Option<u64> {
        *self.last_sync.lock()
    }

    /// Snapshot of the engine.
    ///
    /// Observing a closed breaker with work queued schedules a background
    /// drain, so the queue empties even when no new changes arrive.
    pub fn get_status(&self) -> SyncStatus {
        let circuit_open = !self.breaker.is_closed();
        let is_initialized = self.is_initialized();
        let queue_size = self.queue.len();

        if is_initialized && !circuit_open && queue_size > 0 {
            self.spawn_drain();
        }

        SyncStatus {
            is_initialized,
            strategy: self.strategy(),
            queue_size,
            metrics: self.metrics.snapshot(),
            circuit_open,
            transport_connected: self.transport.is_connected(),
        }
    }

    fn spawn_drain(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime for background drain, deferring to next sync");
            return;
        };
        let Some(engine) = self.self_ref.lock().upgrade() else {
            return;
        };
        handle.spawn(async move {
            engine.drain_queue().await;
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════════════════════════════════════

    /// Persist `{last_sync_timestamp, strategy}`. Never fails; returns whether it stuck.
    pub async fn save_sync_state(&self) -> bool {
        let state = SyncState {
            last_sync_timestamp: self.last_sync_timestamp(),
            strategy: self.strategy(),
        };
        self.persistence.save(&state).await
    }

    /// Read the persisted state, or defaults if missing, corrupt or expired.
    pub async fn load_sync_state(&self) -> SyncState {
        self.persistence.load().await
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
