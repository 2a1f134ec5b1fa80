//! Transport collaborator
//!
//! The engine never touches sockets. It hands finished frames to a
//! [`Transport`] keyed by connection id, and the transport feeds inbound
//! frames back through [`Engine::on_frame_received`].
//!
//! [`MemoryTransport`] is a channel-backed implementation for tests and for
//! embedding two engines in one process.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::TransportError;

/// Outbound half of the transport contract
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one complete frame to the peer behind `connection_id`
    async fn send_frame(&self, connection_id: &str, frame: Vec<u8>) -> Result<(), TransportError>;
}

/// A frame handed to a [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub connection_id: String,
    pub frame: Vec<u8>,
}

/// In-process transport: every sent frame lands on a channel
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: Mutex<HashSet<String>>,
}

impl MemoryTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            tx,
            closed: Mutex::new(HashSet::new()),
        });
        (transport, rx)
    }

    /// Make sends on `connection_id` fail from now on
    pub fn close(&self, connection_id: &str) {
        self.closed.lock().insert(connection_id.to_string());
    }

    pub fn reopen(&self, connection_id: &str) {
        self.closed.lock().remove(connection_id);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_frame(&self, connection_id: &str, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.lock().contains(connection_id) {
            return Err(TransportError::NotConnected(connection_id.to_string()));
        }

        self.tx
            .send(Outbound {
                connection_id: connection_id.to_string(),
                frame,
            })
            .map_err(|_| TransportError::Closed(connection_id.to_string()))
    }
}

/// Pump every frame from `outbox` into `peer`, preserving order.
///
/// Both sides use the same connection id, as a station and its CSMS do.
pub fn forward(mut outbox: mpsc::UnboundedReceiver<Outbound>, peer: Engine) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(out) = outbox.recv().await {
            debug!(connection_id = %out.connection_id, bytes = out.frame.len(), "Forwarding frame");
            if let Err(e) = peer.on_frame_received(&out.connection_id, out.frame).await {
                warn!(connection_id = %out.connection_id, "Peer dropped frame: {}", e);
            }
        }
    })
}
