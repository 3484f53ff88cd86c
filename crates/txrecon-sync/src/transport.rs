//! Transport abstraction for reconciliation messages.
//!
//! The transport layer handles message serialization and delivery.
//! Framing, signing and peer discovery belong to the networking layer
//! behind an implementation of [`Transport`].

use async_trait::async_trait;

use txrecon_core::PeerId;

use crate::error::Result;
use crate::messages::ReconMessage;

/// Transport trait for sending and receiving reconciliation messages.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to a specific peer.
    async fn send(&self, peer: &PeerId, message: ReconMessage) -> Result<()>;

    /// Receive the next message from any peer.
    ///
    /// Returns the sender's PeerId and the message.
    async fn recv(&self) -> Result<(PeerId, ReconMessage)>;

    /// Receive with timeout.
    ///
    /// Returns None if timeout expires before a message arrives.
    async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<(PeerId, ReconMessage)>>;

    /// Get the local peer's identity.
    fn local_peer_id(&self) -> PeerId;

    /// List currently reachable peers.
    async fn connected_peers(&self) -> Result<Vec<PeerId>>;

    /// Check if a specific peer is reachable.
    async fn is_connected(&self, peer: &PeerId) -> bool;
}

/// A simple in-memory transport for testing.
///
/// Messages cross the channel CBOR-encoded, so the wire codec is exercised
/// the same way a socket transport would.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    use crate::error::SyncError;

    #[derive(Debug)]
    struct Envelope {
        from: PeerId,
        bytes: Vec<u8>,
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        senders: RwLock<HashMap<PeerId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, peer_id: PeerId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(1000);

            self.senders.write().await.insert(peer_id, tx);

            MemoryTransport {
                peer_id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Drop a peer from the network; later sends to it fail.
        pub async fn disconnect(&self, peer_id: &PeerId) {
            self.senders.write().await.remove(peer_id);
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        peer_id: PeerId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
    }

    impl MemoryTransport {
        fn open(envelope: Envelope) -> Result<(PeerId, ReconMessage)> {
            Ok((envelope.from, ReconMessage::from_cbor(&envelope.bytes)?))
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &PeerId, message: ReconMessage) -> Result<()> {
            let bytes = message.to_cbor()?;
            let sender = self
                .network
                .senders
                .read()
                .await
                .get(peer)
                .cloned()
                .ok_or_else(|| SyncError::Transport(format!("peer {} not found", peer)))?;
            sender
                .send(Envelope {
                    from: self.peer_id,
                    bytes,
                })
                .await
                .map_err(|_| SyncError::Transport("peer disconnected".into()))
        }

        async fn recv(&self) -> Result<(PeerId, ReconMessage)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(envelope) => Self::open(envelope),
                None => Err(SyncError::Transport("channel closed".into())),
            }
        }

        async fn recv_timeout(
            &self,
            timeout: std::time::Duration,
        ) -> Result<Option<(PeerId, ReconMessage)>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => Self::open(envelope).map(Some),
                Ok(None) => Err(SyncError::Transport("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        fn local_peer_id(&self) -> PeerId {
            self.peer_id
        }

        async fn connected_peers(&self) -> Result<Vec<PeerId>> {
            let senders = self.network.senders.read().await;
            let mut peers: Vec<PeerId> = senders
                .keys()
                .filter(|id| *id != &self.peer_id)
                .copied()
                .collect();
            peers.sort();
            Ok(peers)
        }

        async fn is_connected(&self, peer: &PeerId) -> bool {
            self.network.senders.read().await.contains_key(peer)
        }
    }
}
