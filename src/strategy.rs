// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync strategy selection.
//!
//! The strategy is a pure function of what the process can currently do.
//! It is re-evaluated whenever the transport connects or drops, so it must
//! never fail and never depend on anything but its inputs.
//!
//! # Example
//!
//! ```
//! use content_sync::{determine_sync_strategy, SyncCapabilities, SyncStrategy};
//!
//! let caps = SyncCapabilities { transport_available: true, realtime_enabled: true };
//! assert_eq!(determine_sync_strategy(caps), SyncStrategy::Hybrid);
//!
//! // Degrades, never errors
//! assert_eq!(determine_sync_strategy(SyncCapabilities::default()), SyncStrategy::Polling);
//! ```

use serde::{Deserialize, Serialize};

/// How content changes propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStrategy {
    /// Push every change as it happens
    Immediate,
    /// Push changes in groups
    Batched,
    /// Clients pull on an interval
    Polling,
    /// Push over the live channel, poll as fallback
    Hybrid,
}

impl SyncStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "IMMEDIATE",
            Self::Batched => "BATCHED",
            Self::Polling => "POLLING",
            Self::Hybrid => "HYBRID",
        }
    }

    /// Whether this strategy pushes changes over the transport.
    #[must_use]
    pub fn pushes(&self) -> bool {
        !matches!(self, Self::Polling)
    }
}

impl Default for SyncStrategy {
    fn default() -> Self {
        Self::Polling
    }
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to [`determine_sync_strategy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCapabilities {
    /// The realtime transport is connected
    pub transport_available: bool,
    /// The realtime feature flag is on
    pub realtime_enabled: bool,
}

/// Pick a strategy from the current capabilities.
///
/// | transport | realtime | strategy |
/// |-----------|----------|----------|
/// | yes       | yes      | HYBRID   |
/// | no        | yes      | POLLING  |
/// | yes       | no       | POLLING  |
/// | no        | no       | POLLING  |
#[must_use]
pub fn determine_sync_strategy(caps: SyncCapabilities) -> SyncStrategy {
    match (caps.transport_available, caps.realtime_enabled) {
        (true, true) => SyncStrategy::Hybrid,
        (false, true) | (true, false) | (false, false) => SyncStrategy::Polling,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(transport_available: bool, realtime_enabled: bool) -> SyncCapabilities {
        SyncCapabilities { transport_available, realtime_enabled }
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(determine_sync_strategy(caps(true, true)), SyncStrategy::Hybrid);
        assert_eq!(determine_sync_strategy(caps(false, true)), SyncStrategy::Polling);
        assert_eq!(determine_sync_strategy(caps(true, false)), SyncStrategy::Polling);
        assert_eq!(determine_sync_strategy(caps(false, false)), SyncStrategy::Polling);
    }

    #[test]
    fn test_idempotent() {
        let c = caps(true, true);
        assert_eq!(determine_sync_strategy(c), determine_sync_strategy(c));
    }

    #[test]
    fn test_serde_vocabulary() {
        for strategy in [
            SyncStrategy::Immediate,
            SyncStrategy::Batched,
            SyncStrategy::Polling,
            SyncStrategy::Hybrid,
        ] {
            let encoded = serde_json::to_string(&strategy).unwrap();
            assert_eq!(encoded, format!("\"{}\"", strategy.as_str()));
            let decoded: SyncStrategy = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, strategy);
        }
    }

    #[test]
    fn test_pushes() {
        assert!(SyncStrategy::Hybrid.pushes());
        assert!(SyncStrategy::Immediate.pushes());
        assert!(!SyncStrategy::Polling.pushes());
    }
}
