// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content change API: `sync_content_change` and the shared dispatch path.

use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::event::{content_id, ContentChangePayload, SyncEvent, SyncEventKind};
use crate::queue::{SyncOptions, SyncQueueEntry};

use super::types::Attempt;
use super::{SyncEngine, SyncError};

impl SyncEngine {
    /// Propagate a content change to local subscribers and remote peers.
    ///
    /// Resolves `true` only when the remote push landed. A `false` means the
    /// change was deferred to the pending queue (circuit open, dispatch failed,
    /// or older changes still waiting) or the engine is not initialized, in
    /// which case nothing is queued. Never returns an error.
    ///
    /// While the breaker is closed, local subscribers are notified
    /// optimistically before the remote push, unless `options.silent` is set.
    #[tracing::instrument(skip(self, content_data, options), fields(kind = %change_type, id))]
    pub async fn sync_content_change(
        &self,
        change_type: SyncEventKind,
        content_data: ContentChangePayload,
        options: SyncOptions,
    ) -> bool {
        if !self.is_initialized() {
            debug!("Engine not initialized, change ignored");
            crate::metrics::record_sync("ignored");
            return false;
        }
        if let Some(id) = content_id(&content_data) {
            tracing::Span::current().record("id", id.as_str());
        }

        // Older deferred changes go out first
        if !self.queue.is_empty() && self.breaker.is_closed() {
            self.drain_queue().await;
        }

        let mut entry = SyncQueueEntry::new(change_type, content_data, options);

        if !self.breaker.is_closed() {
            self.breaker.record_rejection();
            self.defer(entry);
            return false;
        }
        if !self.queue.is_empty() {
            // Older changes still waiting or in flight; apply locally, then wait in line
            self.apply_locally(&mut entry);
            self.defer(entry);
            return false;
        }

        match self.attempt(&mut entry).await {
            Attempt::Synced => true,
            Attempt::Failed => {
                self.defer(entry);
                false
            }
            Attempt::Stale => false,
        }
    }

    /// Broadcast to local subscribers once per change, unless silent.
    fn apply_locally(&self, entry: &mut SyncQueueEntry) {
        if !entry.applied_locally && !entry.options.silent {
            self.bus.broadcast(entry.change_type, entry.content_data.clone());
        }
        entry.applied_locally = true;
    }

    /// Broadcast locally if not done yet, then push remotely and account for the result.
    ///
    /// Shared by new changes and queue replays so both follow one path. The
    /// entry is left in the caller's hands whatever the outcome.
    pub(super) async fn attempt(&self, entry: &mut SyncQueueEntry) -> Attempt {
        let epoch = self.current_epoch();
        self.apply_locally(entry);

        let start = Instant::now();
        let result = self.dispatch(entry).await;
        let elapsed = start.elapsed();

        if self.current_epoch() != epoch {
            debug!(kind = %entry.change_type, "Dispatch completed after destroy, ignoring");
            return Attempt::Stale;
        }

        self.metrics
            .update_sync_metrics(result.is_ok(), crate::metrics::duration_ms(elapsed));

        match result {
            Ok(()) => {
                self.breaker.record_success();
                self.mark_synced().await;
                Attempt::Synced
            }
            Err(e) => {
                warn!(
                    kind = %entry.change_type,
                    id = ?content_id(&entry.content_data),
                    error = %e,
                    "Remote sync failed"
                );
                self.breaker.handle_sync_error(&e);
                Attempt::Failed
            }
        }
    }

    /// Encode the change and push it on the transport, bounded by `dispatch_timeout`.
    async fn dispatch(&self, entry: &SyncQueueEntry) -> Result<(), SyncError> {
        if !self.transport.is_connected() {
            return Err(SyncError::TransportUnavailable);
        }

        let event = SyncEvent::new(entry.change_type, entry.content_data.clone());
        let payload = serde_json::to_string(&event)?;
        let channel = entry.options.channel.as_deref().unwrap_or(&self.config.channel);
        let limit = self.config.dispatch_timeout();

        match timeout(limit, self.transport.send(channel, &payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                crate::metrics::record_timeout();
                Err(SyncError::Timeout(limit))
            }
        }
    }

    fn defer(&self, entry: SyncQueueEntry) {
        debug!(kind = %entry.change_type, "Change deferred to pending queue");
        crate::metrics::record_sync("deferred");
        self.queue.push(entry);
    }

    async fn mark_synced(&self) {
        *self.last_sync.lock() = Some(crate::event::now_millis());
        if self.is_initialized() {
            self.save_sync_state().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::bus::SubscriberError;
    use crate::transport::Transport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter(h: &Harness, kind: SyncEventKind) -> Arc<AtomicUsize> {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        h.engine.subscribe(kind, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok::<(), SubscriberError>(())
        });
        seen
    }

    #[tokio::test]
    async fn test_not_initialized_returns_false_and_queues_nothing() {
        let h = harness();
        let seen = counter(&h, SyncEventKind::ContentUpdated);

        let ok = h
            .engine
            .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "1"}), SyncOptions::default())
            .await;

        assert!(!ok);
        assert_eq!(h.engine.queue_size(), 0);
        assert_eq!(h.engine.metrics().total_syncs, 0);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_sync_broadcasts_and_pushes() {
        let h = harness();
        h.engine.initialize().await;
        let seen = counter(&h, SyncEventKind::ContentUpdated);
        let mut peer_rx = h.peer.messages();
        h.peer.connect().await.unwrap();

        let ok = h
            .engine
            .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "42"}), SyncOptions::default())
            .await;

        assert!(ok);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let metrics = h.engine.metrics();
        assert_eq!(metrics.total_syncs, 1);
        assert_eq!(metrics.successful_syncs, 1);
        assert!(h.engine.last_sync_timestamp().is_some());

        let msg = peer_rx.recv().await.unwrap();
        assert_eq!(msg.channel, "content-sync");
        let event: SyncEvent = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(event.kind, SyncEventKind::ContentUpdated);
        assert_eq!(event.data, json!({"id": "42"}));
    }

    #[tokio::test]
    async fn test_silent_skips_local_broadcast() {
        let h = harness();
        h.engine.initialize().await;
        let seen = counter(&h, SyncEventKind::ContentCreated);

        let ok = h
            .engine
            .sync_content_change(SyncEventKind::ContentCreated, json!({"id": "s"}), SyncOptions::silent())
            .await;

        assert!(ok);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_channel_override() {
        let h = harness();
        h.engine.initialize().await;
        let mut peer_rx = h.peer.messages();
        h.peer.connect().await.unwrap();

        h.engine
            .sync_content_change(
                SyncEventKind::CacheInvalidated,
                json!({"scope": "all"}),
                SyncOptions::on_channel("cache"),
            )
            .await;

        assert_eq!(peer_rx.recv().await.unwrap().channel, "cache");
    }

    #[tokio::test]
    async fn test_failed_dispatch_defers_after_local_broadcast() {
        let h = harness();
        h.engine.initialize().await;
        let seen = counter(&h, SyncEventKind::ContentDeleted);
        h.transport.set_connected(false);

        let ok = h
            .engine
            .sync_content_change(SyncEventKind::ContentDeleted, json!({"id": "9"}), SyncOptions::default())
            .await;

        assert!(!ok);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.queue_size(), 1);
        assert_eq!(h.engine.circuit_state().failures, 1);
        let metrics = h.engine.metrics();
        assert_eq!(metrics.failed_syncs, 1);
        assert_eq!(metrics.total_syncs, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_queues_without_dispatch() {
        let h = harness();
        h.engine.initialize().await;
        h.engine.circuit_breaker().trip();

        let ok = h
            .engine
            .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "x"}), SyncOptions::default())
            .await;

        assert!(!ok);
        assert_eq!(h.engine.queue_size(), 1);
        assert_eq!(h.engine.metrics().total_syncs, 0);
        assert_eq!(h.engine.circuit_breaker().rejections(), 1);
    }

    #[tokio::test]
    async fn test_queued_change_goes_out_before_new_one() {
        let h = harness();
        h.engine.initialize().await;
        let mut peer_rx = h.peer.messages();
        h.peer.connect().await.unwrap();

        h.transport.set_connected(false);
        assert!(
            !h.engine
                .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "old"}), SyncOptions::default())
                .await
        );
        h.transport.set_connected(true);

        assert!(
            h.engine
                .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "new"}), SyncOptions::default())
                .await
        );

        let first: SyncEvent = serde_json::from_str(&peer_rx.recv().await.unwrap().payload).unwrap();
        let second: SyncEvent = serde_json::from_str(&peer_rx.recv().await.unwrap().payload).unwrap();
        assert_eq!(first.content_id().as_deref(), Some("old"));
        assert_eq!(second.content_id().as_deref(), Some("new"));
        assert_eq!(h.engine.queue_size(), 0);
    }

    #[tokio::test]
    async fn test_change_behind_queue_is_applied_locally_then_waits() {
        let h = harness();
        h.engine.initialize().await;
        let seen_b = Arc::new(AtomicUsize::new(0));
        let s = seen_b.clone();
        h.engine.subscribe(SyncEventKind::ContentUpdated, move |event| {
            if event.content_id().as_deref() == Some("b") {
                s.fetch_add(1, Ordering::SeqCst);
            }
            Ok::<(), SubscriberError>(())
        });
        let mut peer_rx = h.peer.messages();
        h.peer.connect().await.unwrap();

        h.transport.set_connected(false);
        assert!(
            !h.engine
                .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "a"}), SyncOptions::default())
                .await
        );
        // Pre-drain of "a" fails again, breaker still closed
        let ok = h
            .engine
            .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "b"}), SyncOptions::default())
            .await;

        assert!(!ok);
        assert!(h.engine.is_circuit_breaker_closed());
        assert_eq!(seen_b.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.queue_size(), 2);
        assert_eq!(h.engine.metrics().total_syncs, 2, "only the two attempts at a were dispatched");

        h.transport.set_connected(true);
        let report = h.engine.drain_queue().await;
        assert_eq!(report.drained, 2);
        assert_eq!(seen_b.load(Ordering::SeqCst), 1, "no second broadcast on replay");

        let first: SyncEvent = serde_json::from_str(&peer_rx.recv().await.unwrap().payload).unwrap();
        let second: SyncEvent = serde_json::from_str(&peer_rx.recv().await.unwrap().payload).unwrap();
        assert_eq!(first.content_id().as_deref(), Some("a"));
        assert_eq!(second.content_id().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_silent_change_behind_queue_stays_silent() {
        let h = harness();
        h.engine.initialize().await;
        let seen = counter(&h, SyncEventKind::ContentCreated);
        h.transport.set_connected(false);
        h.engine
            .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "a"}), SyncOptions::default())
            .await;

        h.engine
            .sync_content_change(SyncEventKind::ContentCreated, json!({"id": "b"}), SyncOptions::silent())
            .await;

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(h.engine.queue_size(), 2);
    }

    #[test]
    fn test_sync_exports_one_sample_per_attempt() {
        use crate::metrics::testing::{counter as exported_counter, exported, histogram_len};
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        ::metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                let h = harness();
                h.engine.initialize().await;
                assert!(
                    h.engine
                        .sync_content_change(SyncEventKind::ContentUpdated, json!({"id": "m"}), SyncOptions::default())
                        .await
                );
                h.engine.destroy();
            })
        });

        let samples = exported(&snapshotter);
        assert_eq!(exported_counter(&samples, "content_sync_syncs_total", Some(("status", "success"))), 1);
        assert_eq!(exported_counter(&samples, "content_sync_syncs_total", Some(("status", "failure"))), 0);
        assert_eq!(histogram_len(&samples, "content_sync_dispatch_seconds"), 1);
    }

    #[tokio::test]
    async fn test_success_persists_state() {
        let h = harness();
        h.engine.initialize().await;

        h.engine
            .sync_content_change(
                SyncEventKind::ContentCreated,
                json!({"id": "t", "email": "a@b.com"}),
                SyncOptions::default(),
            )
            .await;

        let raw = h.store.raw(&h.engine.config().state_key).unwrap();
        assert!(raw.contains("lastSyncTimestamp"));
        assert!(!raw.contains("a@b.com"));
    }
}
