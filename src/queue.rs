// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pending queue of deferred content changes.
//!
//! Changes that could not be pushed (circuit open, dispatch failed) wait
//! here in strict FIFO order. The queue is bounded drop-oldest: when full,
//! the oldest waiting entry is discarded to make room.
//!
//! A replay checks entries out with [`PendingQueue::checkout`]. They keep
//! counting toward the queue length until delivered, and an interrupted
//! replay returns them to the front.
//!
//! Entries live in memory only. They are never written to durable storage.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::event::{content_id, ContentChangePayload, SyncEventKind};

/// Per-call options for `sync_content_change`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Skip the local optimistic broadcast
    pub silent: bool,
    /// Transport channel override
    pub channel: Option<String>,
}

impl SyncOptions {
    #[must_use]
    pub fn silent() -> Self {
        Self { silent: true, ..Default::default() }
    }

    #[must_use]
    pub fn on_channel(channel: impl Into<String>) -> Self {
        Self { channel: Some(channel.into()), ..Default::default() }
    }
}

/// A deferred change, replayed unmodified when the remote path recovers.
#[derive(Debug, Clone)]
pub struct SyncQueueEntry {
    pub change_type: SyncEventKind,
    pub content_data: ContentChangePayload,
    pub options: SyncOptions,
    pub enqueued_at: Instant,
    /// Local subscribers have already seen this change
    pub(crate) applied_locally: bool,
}

impl SyncQueueEntry {
    pub fn new(change_type: SyncEventKind, content_data: ContentChangePayload, options: SyncOptions) -> Self {
        Self {
            change_type,
            content_data,
            options,
            enqueued_at: Instant::now(),
            applied_locally: false,
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    waiting: VecDeque<SyncQueueEntry>,
    /// Checked out by a replay and not yet settled
    in_flight: usize,
    /// Bumped by `clear()` so stale checkouts are discarded on return
    generation: u64,
}

impl QueueInner {
    fn depth(&self) -> usize {
        self.waiting.len() + self.in_flight
    }
}

/// FIFO buffer of [`SyncQueueEntry`].
///
/// Entries checked out for replay still count toward [`len`](Self::len)
/// until they are settled, so a new change never overtakes an older one
/// that is being dispatched.
#[derive(Debug)]
pub struct PendingQueue {
    inner: Mutex<QueueInner>,
    capacity: Option<usize>,
}

impl PendingQueue {
    /// `capacity = None` means unbounded.
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            capacity: capacity.filter(|c| *c > 0),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Append to the back. Returns the entry dropped to make room, if any.
    ///
    /// In-flight entries count toward the bound but are never dropped here;
    /// the oldest waiting entry goes instead.
    pub fn push(&self, entry: SyncQueueEntry) -> Option<SyncQueueEntry> {
        let (dropped, depth) = {
            let mut inner = self.inner.lock();
            let dropped = match self.capacity {
                Some(cap) if inner.depth() >= cap => inner.waiting.pop_front(),
                _ => None,
            };
            inner.waiting.push_back(entry);
            (dropped, inner.depth())
        };
        if let Some(ref old) = dropped {
            warn!(
                kind = %old.change_type,
                id = ?content_id(&old.content_data),
                depth,
                "Pending queue full, dropped oldest change"
            );
            crate::metrics::record_queue_dropped(1);
        }
        crate::metrics::set_queue_depth(depth);
        dropped
    }

    /// Check out up to `max` entries from the front for replay.
    ///
    /// Settle each delivered entry through the returned [`Checkout`];
    /// whatever is left when it drops goes back to the front in order.
    pub fn checkout(&self, max: usize) -> Checkout<'_> {
        let mut inner = self.inner.lock();
        let n = max.min(inner.waiting.len());
        let entries: VecDeque<SyncQueueEntry> = inner.waiting.drain(..n).collect();
        inner.in_flight += n;
        Checkout {
            queue: self,
            entries,
            generation: inner.generation,
        }
    }

    /// Waiting plus in-flight entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().depth()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries currently checked out for replay.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// Drop everything, including the claim on in-flight entries.
    /// Returns how many entries were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.depth();
        inner.waiting.clear();
        inner.in_flight = 0;
        inner.generation += 1;
        crate::metrics::set_queue_depth(0);
        n
    }

    fn settle(&self, generation: u64, n: usize) {
        let depth = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.in_flight = inner.in_flight.saturating_sub(n);
            inner.depth()
        };
        crate::metrics::set_queue_depth(depth);
    }

    fn restore(&self, generation: u64, returned: VecDeque<SyncQueueEntry>) {
        if returned.is_empty() {
            return;
        }
        let (dropped, depth) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(discarded = returned.len(), "Queue cleared during replay, discarding checkout");
                return;
            }
            inner.in_flight = inner.in_flight.saturating_sub(returned.len());
            for entry in returned.into_iter().rev() {
                inner.waiting.push_front(entry);
            }
            let mut dropped = 0usize;
            if let Some(cap) = self.capacity {
                while inner.depth() > cap && inner.waiting.pop_front().is_some() {
                    dropped += 1;
                }
            }
            (dropped, inner.depth())
        };
        if dropped > 0 {
            warn!(dropped, depth, "Pending queue over capacity after replay, dropped oldest");
            crate::metrics::record_queue_dropped(dropped);
        }
        crate::metrics::set_queue_depth(depth);
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Entries taken from the front of a [`PendingQueue`] for replay.
#[derive(Debug)]
#[must_use = "dropping a checkout returns its entries to the queue"]
pub struct Checkout<'a> {
    queue: &'a PendingQueue,
    entries: VecDeque<SyncQueueEntry>,
    generation: u64,
}

impl Checkout<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Next entry to replay, left in place until settled.
    pub fn front_mut(&mut self) -> Option<&mut SyncQueueEntry> {
        self.entries.front_mut()
    }

    /// The front entry was delivered; release it from the queue.
    pub fn settle_front(&mut self) -> Option<SyncQueueEntry> {
        let entry = self.entries.pop_front()?;
        self.queue.settle(self.generation, 1);
        Some(entry)
    }

    /// Release every remaining entry from the queue and hand them over.
    pub fn settle_all(mut self) -> Vec<SyncQueueEntry> {
        let taken = std::mem::take(&mut self.entries);
        self.queue.settle(self.generation, taken.len());
        taken.into()
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        let rest = std::mem::take(&mut self.entries);
        self.queue.restore(self.generation, rest);
    }
}
