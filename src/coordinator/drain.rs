//! Pending queue replay.
//!
//! Deferred changes are replayed oldest first through the same dispatch path
//! as new ones. Entries that local subscribers already saw are not broadcast
//! again. A batch stays counted in the queue while it is in flight, so a new
//! change arriving meanwhile queues behind it. The first failure stops the
//! pass and the undelivered entries return to the front.

use tokio::time::Instant;
use tracing::{debug, info};

use super::types::Attempt;
use super::{DrainReport, SyncEngine};

impl SyncEngine {
    /// Replay queued changes while the breaker stays closed.
    ///
    /// Only one pass runs at a time; a call that finds another pass in
    /// progress returns immediately with `completed = false`.
    pub async fn drain_queue(&self) -> DrainReport {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already in progress");
            return DrainReport {
                remaining: self.queue.len(),
                ..Default::default()
            };
        };

        let start = Instant::now();
        let batch_size = self.config.drain_batch_size.max(1);
        let mut drained = 0usize;
        let mut completed = false;

        'passes: while self.is_initialized() && self.breaker.is_closed() {
            let mut batch = self.queue.checkout(batch_size);
            if batch.is_empty() {
                completed = true;
                break;
            }

            while let Some(entry) = batch.front_mut() {
                if !self.breaker.is_closed() {
                    break 'passes;
                }

                match self.attempt(entry).await {
                    Attempt::Synced => {
                        batch.settle_front();
                        drained += 1;
                    }
                    // Dropping the batch returns this entry and the rest to the front
                    Attempt::Failed => break 'passes,
                    // Queue was cleared by destroy(); the batch is discarded on drop
                    Attempt::Stale => break 'passes,
                }
            }
        }

        let remaining = self.queue.len();
        if drained > 0 || !completed {
            info!(
                drained,
                remaining,
                completed,
                duration_ms = crate::metrics::duration_ms(start.elapsed()),
                "Pending queue drain pass finished"
            );
        }
        crate::metrics::record_queue_drain(drained, completed);

        DrainReport {
            drained,
            remaining,
            completed,
        }
    }
}
