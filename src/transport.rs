// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Realtime transport seam.
//!
//! The engine only needs a narrow view of the duplex channel: bring it up,
//! push a payload on a named channel, watch the connection state, and read
//! what peers send. Reconnect policy belongs to the adapter.
//!
//! [`InProcessTransport`] connects engines in the same process through a
//! shared [`InProcessHub`]. Every message a transport sends is delivered to
//! every other transport on the hub, never back to the sender.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Connection state reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// A message received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub channel: String,
    pub payload: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self);
    async fn send(&self, channel: &str, payload: &str) -> Result<(), TransportError>;
    /// Stream of inbound peer messages.
    fn messages(&self) -> broadcast::Receiver<TransportMessage>;
    /// Observable connection state.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    fn is_connected(&self) -> bool {
        *self.connection_state().borrow() == ConnectionState::Connected
    }
}

const INBOUND_CAPACITY: usize = 1024;

type Peer = (u64, broadcast::Sender<TransportMessage>);

/// Shared medium for [`InProcessTransport`]s.
#[derive(Clone, Default)]
pub struct InProcessHub {
    peers: Arc<Mutex<Vec<Peer>>>,
    next_id: Arc<AtomicU64>,
}

impl InProcessHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport attached to this hub (starts disconnected).
    #[must_use]
    pub fn transport(&self) -> InProcessTransport {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        InProcessTransport {
            id,
            hub: self.clone(),
            inbound,
            state: state_tx,
        }
    }

    fn join(&self, id: u64, sender: broadcast::Sender<TransportMessage>) {
        let mut peers = self.peers.lock();
        if !peers.iter().any(|(peer, _)| *peer == id) {
            peers.push((id, sender));
        }
    }

    fn leave(&self, id: u64) {
        self.peers.lock().retain(|(peer, _)| *peer != id);
    }

    fn deliver(&self, from: u64, message: &TransportMessage) -> usize {
        let peers = self.peers.lock();
        peers
            .iter()
            .filter(|(peer, _)| *peer != from)
            .filter(|(_, tx)| tx.send(message.clone()).is_ok())
            .count()
    }
}

/// In-process transport attached to an [`InProcessHub`].
pub struct InProcessTransport {
    id: u64,
    hub: InProcessHub,
    inbound: broadcast::Sender<TransportMessage>,
    state: watch::Sender<ConnectionState>,
}

impl InProcessTransport {
    /// Simulate the link dropping or recovering without a full connect cycle.
    pub fn set_connected(&self, connected: bool) {
        if connected {
            self.hub.join(self.id, self.inbound.clone());
            self.state.send_replace(ConnectionState::Connected);
        } else {
            self.hub.leave(self.id);
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.set_connected(true);
        debug!(peer = self.id, "In-process transport connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.set_connected(false);
        debug!(peer = self.id, "In-process transport disconnected");
    }

    async fn send(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let message = TransportMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        let delivered = self.hub.deliver(self.id, &message);
        debug!(peer = self.id, channel, delivered, "In-process transport sent");
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<TransportMessage> {
        self.inbound.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_requires_connection() {
        let hub = InProcessHub::new();
        let t = hub.transport();
        assert!(!t.is_connected());
        assert_eq!(t.send("c", "x").await, Err(TransportError::NotConnected));

        t.connect().await.unwrap();
        assert!(t.is_connected());
        assert!(t.send("c", "x").await.is_ok());
    }

    #[tokio::test]
    async fn test_delivers_to_peers_not_self() {
        let hub = InProcessHub::new();
        let a = hub.transport();
        let b = hub.transport();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let mut a_rx = a.messages();
        let mut b_rx = b.messages();

        a.send("content-sync", "hello").await.unwrap();

        let got = b_rx.recv().await.unwrap();
        assert_eq!(got.channel, "content-sync");
        assert_eq!(got.payload, "hello");
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_state_is_observable() {
        let hub = InProcessHub::new();
        let t = hub.transport();
        let mut state = t.connection_state();
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);

        t.connect().await.unwrap();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

        t.disconnect().await;
        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnected_peer_receives_nothing() {
        let hub = InProcessHub::new();
        let a = hub.transport();
        let b = hub.transport();
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let mut b_rx = b.messages();

        b.set_connected(false);
        a.send("c", "missed").await.unwrap();
        assert!(b_rx.try_recv().is_err());
    }
}
