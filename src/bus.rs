// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process event bus.
//!
//! Subscribers register per [`SyncEventKind`]. A broadcast snapshots the
//! callbacks for one kind and invokes each exactly once, outside the
//! registry shard lock, so a callback may itself subscribe or unsubscribe.
//!
//! A subscriber that returns `Err` or panics is logged and counted. The
//! remaining subscribers still run and the registry stays usable.
//!
//! # Example
//!
//! ```
//! use content_sync::{EventBus, SyncEventKind};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let bus = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! let sub = bus.subscribe(SyncEventKind::ContentCreated, move |_event| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(())
//! });
//!
//! bus.broadcast(SyncEventKind::ContentCreated, json!({"id": "1"}));
//! sub.unsubscribe();
//! bus.broadcast(SyncEventKind::ContentCreated, json!({"id": "2"}));
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::{ContentChangePayload, SyncEvent, SyncEventKind};

/// Error a subscriber may return. It never leaves the bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("subscriber failed: {0}")]
pub struct SubscriberError(pub String);

impl SubscriberError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Subscriber callback.
pub type SubscriberFn = dyn Fn(&SyncEvent) -> Result<(), SubscriberError> + Send + Sync;

type Registry = DashMap<SyncEventKind, Vec<(u64, Arc<SubscriberFn>)>>;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that returned `Ok`
    pub delivered: usize,
    /// Subscribers that returned `Err` or panicked
    pub failed: usize,
}

/// Per-kind subscriber registry with synchronous fan-out.
pub struct EventBus {
    subscribers: Arc<Registry>,
    next_id: AtomicU64,
    subscriber_errors: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            subscriber_errors: AtomicU64::new(0),
        }
    }

    /// Register `callback` for `kind`.
    ///
    /// Dropping the returned handle does not unsubscribe; call
    /// [`Subscription::unsubscribe`] to remove exactly this registration.
    pub fn subscribe<F>(&self, kind: SyncEventKind, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        debug!(kind = %kind, subscription = id, "Subscriber registered");
        Subscription {
            registry: Arc::downgrade(&self.subscribers),
            kind,
            id,
        }
    }

    /// Build a [`SyncEvent`] stamped now and deliver it to every subscriber of `kind`.
    pub fn broadcast(&self, kind: SyncEventKind, data: ContentChangePayload) -> BroadcastReport {
        self.publish(&SyncEvent::new(kind, data))
    }

    /// Deliver an already-built event (e.g. one received from a peer).
    pub fn publish(&self, event: &SyncEvent) -> BroadcastReport {
        // Snapshot and release the shard lock before running callbacks
        let callbacks: Vec<(u64, Arc<SubscriberFn>)> = match self.subscribers.get(&event.kind) {
            Some(entry) => entry.value().clone(),
            None => return BroadcastReport::default(),
        };

        let mut report = BroadcastReport::default();
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(kind = %event.kind, subscription = id, error = %e, "Subscriber returned an error");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(kind = %event.kind, subscription = id, "Subscriber panicked");
                }
            }
        }

        if report.failed > 0 {
            self.subscriber_errors.fetch_add(report.failed as u64, Ordering::Relaxed);
            crate::metrics::record_subscriber_errors(event.kind.as_str(), report.failed);
        }
        crate::metrics::record_broadcast(event.kind.as_str());
        report
    }

    /// Number of live registrations for `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: SyncEventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, |entry| entry.len())
    }

    /// Number of live registrations across all kinds.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.subscribers.iter().map(|entry| entry.len()).sum()
    }

    /// Subscriber failures since creation.
    #[must_use]
    pub fn subscriber_errors(&self) -> u64 {
        self.subscriber_errors.load(Ordering::Relaxed)
    }

    /// Drop every registration. Outstanding handles become no-ops.
    pub fn clear(&self) {
        self.subscribers.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one registration.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    kind: SyncEventKind,
    id: u64,
}

impl Subscription {
    #[must_use]
    pub fn kind(&self) -> SyncEventKind {
        self.kind
    }

    /// Remove this registration. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let Some(mut entry) = registry.get_mut(&self.kind) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(id, _)| *id != self.id);
        let removed = entry.len() < before;
        if removed {
            debug!(kind = %self.kind, subscription = self.id, "Subscriber removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn(&SyncEvent) -> Result<(), SubscriberError> {
        let counter = counter.clone();
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_fan_out_and_unsubscribe() {
        let bus = EventBus::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let sub_a = bus.subscribe(SyncEventKind::ContentCreated, counting(&a));
        let _sub_b = bus.subscribe(SyncEventKind::ContentCreated, counting(&b));

        let report = bus.broadcast(SyncEventKind::ContentCreated, json!({}));
        assert_eq!(report.delivered, 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);

        assert!(sub_a.unsubscribe());
        bus.broadcast(SyncEventKind::ContentCreated, json!({}));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_kinds_are_isolated() {
        let bus = EventBus::new();
        let created = Arc::new(AtomicUsize::new(0));
        let _sub = bus.subscribe(SyncEventKind::ContentCreated, counting(&created));

        let report = bus.broadcast(SyncEventKind::ContentDeleted, json!({"id": "x"}));
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_callback_twice_removes_only_one() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let first = bus.subscribe(SyncEventKind::BulkUpdate, counting(&hits));
        let _second = bus.subscribe(SyncEventKind::BulkUpdate, counting(&hits));

        first.unsubscribe();
        bus.broadcast(SyncEventKind::BulkUpdate, json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(SyncEventKind::BulkUpdate), 1);
    }

    #[test]
    fn test_failing_subscriber_is_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = bus.subscribe(SyncEventKind::ContentUpdated, |_| Err(SubscriberError::new("nope")));
        let _panics = bus.subscribe(SyncEventKind::ContentUpdated, |_| panic!("subscriber bug"));
        let _good = bus.subscribe(SyncEventKind::ContentUpdated, counting(&hits));

        let report = bus.broadcast(SyncEventKind::ContentUpdated, json!({"id": "1"}));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_errors(), 2);

        // Bus still works afterwards
        bus.broadcast(SyncEventKind::ContentUpdated, json!({"id": "2"}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_can_subscribe_during_broadcast() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = bus.clone();
        let _sub = bus.subscribe(SyncEventKind::CacheInvalidated, move |_| {
            let _nested = inner_bus.subscribe(SyncEventKind::ContentCreated, |_| Ok(()));
            Ok(())
        });

        bus.broadcast(SyncEventKind::CacheInvalidated, json!({}));
        assert_eq!(bus.subscriber_count(SyncEventKind::ContentCreated), 1);
    }

    #[test]
    fn test_event_is_stamped() {
        let bus = EventBus::new();
        let stamped = Arc::new(AtomicU64::new(0));
        let sink = stamped.clone();
        let _sub = bus.subscribe(SyncEventKind::ContentPublished, move |event| {
            assert_eq!(event.data["id"], "p1");
            sink.store(event.timestamp, Ordering::SeqCst);
            Ok(())
        });

        bus.broadcast(SyncEventKind::ContentPublished, json!({"id": "p1"}));
        assert!(stamped.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let bus = EventBus::new();
        let sub = bus.subscribe(SyncEventKind::ContentCreated, |_| Ok(()));
        bus.clear();
        assert_eq!(bus.total_subscribers(), 0);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus = EventBus::new();
        let sub = bus.subscribe(SyncEventKind::ContentCreated, |_| Ok(()));
        drop(bus);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_hundred_broadcasts_are_fast() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let _ = bus.subscribe(SyncEventKind::ContentUpdated, counting(&hits));
        }
        for _ in 0..50 {
            let _ = bus.subscribe(SyncEventKind::ContentDeleted, |_| Ok(()));
        }

        let start = Instant::now();
        for i in 0..100 {
            bus.broadcast(SyncEventKind::ContentUpdated, json!({"id": i}));
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(hits.load(Ordering::SeqCst), 5_000);
    }
}
