// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for content-sync.
//!
//! Two layers live here:
//! - [`MetricsRecorder`] keeps the running [`SyncMetrics`] the engine reports
//!   through `get_status()`.
//! - Free functions emit through the `metrics` crate so the host process can
//!   choose the exporter (Prometheus, OTEL, etc.).
//!
//! # Metric Naming Convention
//! - `content_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: wire event kind (`CONTENT_CREATED`, ...)
//! - `status`: success, failure, deferred
//! - `circuit`: breaker name

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

/// Running sync counters.
///
/// `successful_syncs + failed_syncs == total_syncs` after every update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetrics {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    /// Cumulative moving average of sync latency in ms, rounded
    pub average_latency: u64,
    /// Latency of the most recent sync in ms
    pub last_sync_duration: u64,
}

impl SyncMetrics {
    /// Fold one sync attempt into the counters.
    pub fn record(&mut self, success: bool, latency_ms: u64) {
        self.total_syncs += 1;
        if success {
            self.successful_syncs += 1;
        } else {
            self.failed_syncs += 1;
        }
        let n = self.total_syncs as f64;
        let previous = self.average_latency as f64 * (n - 1.0);
        self.average_latency = ((previous + latency_ms as f64) / n).round() as u64;
        self.last_sync_duration = latency_ms;
    }

    /// Success ratio (0.0 - 1.0), 1.0 before any sync.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_syncs == 0 {
            return 1.0;
        }
        self.successful_syncs as f64 / self.total_syncs as f64
    }
}

/// Thread-safe owner of [`SyncMetrics`].
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: Mutex<SyncMetrics>,
}

impl MetricsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sync attempt and mirror it to the exporter.
    pub fn update_sync_metrics(&self, success: bool, latency_ms: u64) -> SyncMetrics {
        let snapshot = {
            let mut metrics = self.inner.lock();
            metrics.record(success, latency_ms);
            *metrics
        };
        record_sync(if success { "success" } else { "failure" });
        record_sync_latency(Duration::from_millis(latency_ms));
        snapshot
    }

    #[must_use]
    pub fn snapshot(&self) -> SyncMetrics {
        *self.inner.lock()
    }

    pub fn reset(&self) {
        *self.inner.lock() = SyncMetrics::default();
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
#[must_use]
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC - Façade outcomes
// ═══════════════════════════════════════════════════════════════════════════

/// Record a sync outcome (success, failure, deferred)
pub fn record_sync(status: &str) {
    counter!(
        "content_sync_syncs_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record remote dispatch latency
pub fn record_sync_latency(duration: Duration) {
    histogram!("content_sync_dispatch_seconds").record(duration.as_secs_f64());
}

/// Record a remote dispatch that hit the timeout
pub fn record_timeout() {
    counter!("content_sync_dispatch_timeouts_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// EVENT BUS
// ═══════════════════════════════════════════════════════════════════════════

/// Record a local broadcast
pub fn record_broadcast(kind: &str) {
    counter!(
        "content_sync_broadcasts_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record subscribers that failed during a broadcast
pub fn record_subscriber_errors(kind: &str, count: usize) {
    counter!(
        "content_sync_subscriber_errors_total",
        "kind" => kind.to_string()
    )
    .increment(count as u64);
}

/// Record a change received from a peer
pub fn record_inbound(kind: &str) {
    counter!(
        "content_sync_inbound_events_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// PENDING QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// Set pending queue depth
pub fn set_queue_depth(depth: usize) {
    gauge!("content_sync_queue_depth").set(depth as f64);
}

/// Record entries dropped on overflow
pub fn record_queue_dropped(count: usize) {
    counter!("content_sync_queue_dropped_total").increment(count as u64);
}

/// Record a drain pass
pub fn record_queue_drain(drained: usize, completed: bool) {
    let status = if completed { "complete" } else { "interrupted" };
    counter!(
        "content_sync_queue_drains_total",
        "status" => status
    )
    .increment(1);
    counter!("content_sync_queue_drained_items_total").increment(drained as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker state change (0 = closed, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "content_sync_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "content_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE / LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a persistence operation
pub fn record_state_persist(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "content_sync_state_operations_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record persisted state that could not be decoded
pub fn record_state_corrupt() {
    counter!("content_sync_state_corrupt_total").increment(1);
}

/// Record a strategy (re)selection
pub fn record_strategy(strategy: &str) {
    counter!(
        "content_sync_strategy_selections_total",
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

/// Track engine state transitions
pub fn set_engine_state(state: &str) {
    counter!(
        "content_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}
