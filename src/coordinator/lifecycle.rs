//! Engine lifecycle management: initialize, destroy, background tasks.
//!
//! `initialize()` restores persisted state, brings the transport up and picks
//! a strategy, then spawns three tasks that hold only a weak reference to the
//! engine:
//! - connection watcher: re-selects the strategy on every transport state
//!   change and drains the queue on reconnect
//! - inbound forwarder: decodes peer messages and publishes them locally
//! - drain ticker: periodic drain while work is queued

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::event::SyncEvent;
use crate::resilience::retry::retry;
use crate::strategy::{determine_sync_strategy, SyncCapabilities, SyncStrategy};
use crate::transport::{ConnectionState, TransportMessage};

use super::{EngineState, SyncEngine};

impl SyncEngine {
    /// Bring the engine up.
    ///
    /// Startup flow:
    /// 1. Load persisted `SyncState` (defaults if missing/corrupt/expired)
    /// 2. Connect the transport with backoff; failure leaves it degraded, not fatal
    /// 3. Run the strategy selector
    /// 4. Spawn background tasks
    /// 5. Running
    ///
    /// Calling it on a running engine is a no-op.
    #[tracing::instrument(skip(self), fields(strategy))]
    pub async fn initialize(self: &Arc<Self>) {
        if matches!(self.state(), EngineState::Initializing | EngineState::Running) {
            debug!(state = %self.state(), "Initialize called twice, ignoring");
            return;
        }
        let start = std::time::Instant::now();
        info!("Initializing content sync engine...");
        self.set_state(EngineState::Initializing);
        *self.self_ref.lock() = Arc::downgrade(self);

        let persisted = self.persistence.load().await;
        *self.last_sync.lock() = persisted.last_sync_timestamp;
        debug!(
            last_sync = ?persisted.last_sync_timestamp,
            previous_strategy = %persisted.strategy,
            "Restored sync state"
        );

        if !self.transport.is_connected() {
            let transport = self.transport.clone();
            if let Err(e) = retry("transport_connect", &self.connect_retry, || {
                let transport = transport.clone();
                async move { transport.connect().await }
            })
            .await
            {
                warn!(error = %e, "Transport unavailable at startup, continuing degraded");
            }
        }

        let strategy = self.refresh_strategy();
        tracing::Span::current().record("strategy", strategy.as_str());

        self.spawn_background_tasks();
        self.set_state(EngineState::Running);
        self.save_sync_state().await;

        info!(
            strategy = %strategy,
            transport_connected = self.transport.is_connected(),
            duration_ms = crate::metrics::duration_ms(start.elapsed()),
            "Content sync engine running"
        );
    }

    /// Tear the engine down.
    ///
    /// Clears subscribers and the pending queue and marks the engine
    /// uninitialized. Dispatches still in flight complete as no-ops.
    pub fn destroy(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.set_state(EngineState::Destroyed);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.self_ref.lock() = Weak::new();

        self.bus.clear();
        let dropped = self.queue.clear();
        info!(dropped_queued = dropped, "Content sync engine destroyed");
    }

    /// Re-run the strategy selector against current capabilities.
    pub fn refresh_strategy(&self) -> SyncStrategy {
        let caps = SyncCapabilities {
            transport_available: self.transport.is_connected(),
            realtime_enabled: self.flags.get_flag(&self.config.realtime_flag),
        };
        let strategy = determine_sync_strategy(caps);
        let previous = std::mem::replace(&mut *self.strategy.write(), strategy);
        if previous != strategy {
            info!(from = %previous, to = %strategy, ?caps, "Sync strategy changed");
            crate::metrics::record_strategy(strategy.as_str());
        }
        strategy
    }

    /// Publish a peer's change to local subscribers. Never re-sent.
    pub(super) fn handle_inbound(&self, message: &TransportMessage) {
        if message.channel != self.config.channel {
            debug!(channel = %message.channel, "Ignoring message on foreign channel");
            return;
        }
        match serde_json::from_str::<SyncEvent>(&message.payload) {
            Ok(event) => {
                debug!(kind = %event.kind, id = ?event.content_id(), "Inbound change");
                crate::metrics::record_inbound(event.kind.as_str());
                self.bus.publish(&event);
            }
            Err(e) => {
                warn!(error = %e, bytes = message.payload.len(), "Dropping undecodable inbound message");
                crate::metrics::record_inbound("undecodable");
            }
        }
    }

    fn spawn_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }

        tasks.push(self.spawn_connection_watcher());
        tasks.push(self.spawn_inbound_forwarder());
        if let Some(period) = self.config.drain_interval() {
            tasks.push(self.spawn_drain_ticker(period));
        }
    }

    fn spawn_connection_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::downgrade(self);
        // A fresh receiver has already seen the current value
        let mut state_rx = self.transport.connection_state();

        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let connection = *state_rx.borrow_and_update();
                let Some(engine) = engine.upgrade() else { break };
                if !engine.is_initialized() {
                    break;
                }

                let strategy = engine.refresh_strategy();
                info!(connection = %connection, strategy = %strategy, "Transport connection changed");
                if connection == ConnectionState::Connected {
                    engine.drain_queue().await;
                }
            }
            debug!("Connection watcher stopped");
        })
    }

    fn spawn_inbound_forwarder(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let mut inbound = self.transport.messages();

        tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(message) => {
                        let Some(engine) = engine.upgrade() else { break };
                        engine.handle_inbound(&message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Inbound forwarder lagged, messages lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Inbound forwarder stopped");
        })
    }

    fn spawn_drain_ticker(self: &Arc<Self>, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else { break };
                if !engine.is_initialized() {
                    break;
                }
                if !engine.queue.is_empty() && engine.breaker.is_closed() {
                    engine.drain_queue().await;
                }
            }
        })
    }
}
