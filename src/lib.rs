// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Content Sync
//!
//! Realtime content synchronization between connected clients, with
//! graceful degradation when the transport or backend is unavailable.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Content Layer                         │
//! │  • Calls sync_content_change() on every mutation           │
//! │  • Subscribes to react to remote-origin changes            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SyncEngine (façade)                       │
//! │  • Circuit breaker gate                                    │
//! │  • Optimistic local broadcast via EventBus                 │
//! │  • Remote push with timeout, metrics                       │
//! └─────────────────────────────────────────────────────────────┘
//!                │                               │
//!        (closed, push ok)              (open or push failed)
//!                ▼                               ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │   Transport (realtime)    │   │  Pending queue (FIFO, drop  │
//! │  • Peers re-publish the   │   │  oldest). Drained on        │
//! │    event locally          │◄──│  reconnect, ticker, status  │
//! └───────────────────────────┘   └─────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   State persistence                         │
//! │  • {last_sync_timestamp, strategy} only, never payloads    │
//! │  • MemoryStore or SqliteStore                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use content_sync::{
//!     InProcessHub, MemoryStore, StaticFlags, SyncDeps, SyncEngine, SyncEngineConfig,
//!     SyncEventKind, SyncOptions,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = InProcessHub::new();
//!     let engine = Arc::new(SyncEngine::new(
//!         SyncEngineConfig::default(),
//!         SyncDeps {
//!             transport: Arc::new(hub.transport()),
//!             store: Arc::new(MemoryStore::new()),
//!             flags: Arc::new(StaticFlags::new().with("realtime_sync_enabled", true)),
//!         },
//!     ));
//!     engine.initialize().await;
//!
//!     engine.subscribe(SyncEventKind::ContentPublished, |event| {
//!         println!("published: {:?}", event.content_id());
//!         Ok(())
//!     });
//!
//!     engine
//!         .sync_content_change(SyncEventKind::ContentPublished, json!({"id": "42"}), SyncOptions::default())
//!         .await;
//!
//!     println!("{:?}", engine.get_status());
//!     engine.destroy();
//! }
//! ```
//!
//! ## Strategy selection
//!
//! ```rust
//! use content_sync::{determine_sync_strategy, SyncCapabilities, SyncStrategy};
//!
//! let caps = SyncCapabilities { transport_available: true, realtime_enabled: true };
//! assert_eq!(determine_sync_strategy(caps), SyncStrategy::Hybrid);
//! assert_eq!(determine_sync_strategy(SyncCapabilities::default()), SyncStrategy::Polling);
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The main [`SyncEngine`] façade and lifecycle
//! - [`bus`]: Per-kind subscriber registry with isolated fan-out
//! - [`resilience`]: Circuit breaker and retry
//! - [`queue`]: Pending queue of deferred changes
//! - [`persistence`]: Privacy-scrubbed sync state
//! - [`storage`]: Key-value backends (memory, SQLite)
//! - [`transport`]: Realtime transport seam and in-process hub
//! - [`metrics`]: Sync counters and exporter facade

pub mod config;
pub mod event;
pub mod strategy;
pub mod bus;
pub mod queue;
pub mod resilience;
pub mod metrics;
pub mod storage;
pub mod persistence;
pub mod transport;
pub mod flags;
pub mod coordinator;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::{ConfigError, SyncEngineConfig};
pub use coordinator::{DrainReport, EngineState, SyncDeps, SyncEngine, SyncError, SyncStatus};
pub use event::{ContentChangePayload, SyncEvent, SyncEventKind};
pub use strategy::{determine_sync_strategy, SyncCapabilities, SyncStrategy};
pub use bus::{BroadcastReport, EventBus, SubscriberError, Subscription};
pub use queue::{Checkout, PendingQueue, SyncOptions, SyncQueueEntry};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitConfig, CircuitState};
pub use resilience::retry::RetryConfig;
pub use metrics::{MetricsRecorder, SyncMetrics};
pub use persistence::{StatePersistence, SyncState};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore, StorageError};
pub use transport::{ConnectionState, InProcessHub, InProcessTransport, Transport, TransportError, TransportMessage};
pub use flags::{FeatureFlags, StaticFlags};
