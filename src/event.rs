// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync event data structures.
//!
//! A [`SyncEvent`] is the unit that flows over the bus and the wire. The
//! event kind is a closed enum whose serialized names are the interop
//! vocabulary shared with every other client on the channel.
//!
//! # Example
//!
//! ```
//! use content_sync::{SyncEvent, SyncEventKind};
//! use serde_json::json;
//!
//! let event = SyncEvent::new(SyncEventKind::ContentUpdated, json!({"id": "42"}));
//! let wire = serde_json::to_string(&event).unwrap();
//! assert!(wire.contains(r#""type":"CONTENT_UPDATED""#));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque content payload. The engine reads `id` and `contentType` for
/// logging and never inspects anything else.
pub type ContentChangePayload = Value;

/// Every event kind the engine broadcasts or accepts from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEventKind {
    ContentCreated,
    ContentUpdated,
    ContentDeleted,
    ContentPublished,
    ContentUnpublished,
    BulkUpdate,
    CacheInvalidated,
}

impl SyncEventKind {
    pub const ALL: [SyncEventKind; 7] = [
        Self::ContentCreated,
        Self::ContentUpdated,
        Self::ContentDeleted,
        Self::ContentPublished,
        Self::ContentUnpublished,
        Self::BulkUpdate,
        Self::CacheInvalidated,
    ];

    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentCreated => "CONTENT_CREATED",
            Self::ContentUpdated => "CONTENT_UPDATED",
            Self::ContentDeleted => "CONTENT_DELETED",
            Self::ContentPublished => "CONTENT_PUBLISHED",
            Self::ContentUnpublished => "CONTENT_UNPUBLISHED",
            Self::BulkUpdate => "BULK_UPDATE",
            Self::CacheInvalidated => "CACHE_INVALIDATED",
        }
    }

    /// Parse a wire name. Unknown names yield `None`.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for SyncEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broadcast event. Subscribers only ever see it by shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub kind: SyncEventKind,
    pub data: ContentChangePayload,
    /// Epoch millis at construction
    pub timestamp: u64,
}

impl SyncEvent {
    /// Build an event stamped with the current time.
    pub fn new(kind: SyncEventKind, data: ContentChangePayload) -> Self {
        Self {
            kind,
            data,
            timestamp: now_millis(),
        }
    }

    /// `data.id` if it is a string or number.
    #[must_use]
    pub fn content_id(&self) -> Option<String> {
        content_id(&self.data)
    }
}

/// Extract the `id` of a payload for logging.
#[must_use]
pub fn content_id(data: &ContentChangePayload) -> Option<String> {
    match data.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract the `contentType` of a payload for logging.
#[must_use]
pub fn content_type(data: &ContentChangePayload) -> Option<&str> {
    data.get("contentType").and_then(Value::as_str)
}

pub(crate) fn now_millis() -> u64 {
    crate::metrics::duration_ms(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default(),
    )
}
