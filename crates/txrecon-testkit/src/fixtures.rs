//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: peers wired to a shared
//! in-memory network, each with its own store and driver.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use txrecon_core::{ItemId, PeerId, ReconciliationConfig};
use txrecon_store::{ItemStore, MemoryStore};
use txrecon_sync::{MemoryNetwork, MemoryTransport, ReconciliationDriver, SyncConfig};

pub type TestDriver = ReconciliationDriver<MemoryStore, MemoryTransport>;

/// A peer on a test network.
pub struct TestPeer {
    pub id: PeerId,
    pub driver: Arc<TestDriver>,
}

impl TestPeer {
    /// Create a peer with a deterministic identity from `byte`.
    pub async fn join(network: &Arc<MemoryNetwork>, byte: u8, config: &ReconciliationConfig) -> Self {
        let id = PeerId::from_bytes([byte; 32]);
        let transport = network.create_transport(id).await;
        let store = MemoryStore::from_config(config);
        let sync = SyncConfig {
            message_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        Self {
            id,
            driver: Arc::new(ReconciliationDriver::new(store, transport, config.clone(), sync)),
        }
    }

    pub async fn add_items(&self, items: &[ItemId]) {
        for &item in items {
            self.driver
                .add_item(item)
                .await
                .expect("memory store insert");
        }
    }

    /// All items, sorted.
    pub async fn items(&self) -> Vec<ItemId> {
        let mut items = self
            .driver
            .store()
            .all_items()
            .await
            .expect("memory store read");
        items.sort();
        items
    }

    /// Serve incoming messages until the peer goes quiet.
    pub fn spawn_responder(&self) -> tokio::task::JoinHandle<()> {
        let driver = self.driver.clone();
        tokio::spawn(async move {
            while let Ok(true) = driver.serve_one().await {}
        })
    }
}

/// Two peers holding the given sets.
pub struct TwoPeers {
    pub network: Arc<MemoryNetwork>,
    pub a: TestPeer,
    pub b: TestPeer,
}

impl TwoPeers {
    pub async fn new(config: &ReconciliationConfig, a_items: &[ItemId], b_items: &[ItemId]) -> Self {
        let network = MemoryNetwork::new();
        let a = TestPeer::join(&network, 0xA1, config).await;
        let b = TestPeer::join(&network, 0xB2, config).await;
        a.add_items(a_items).await;
        b.add_items(b_items).await;
        Self { network, a, b }
    }

    pub async fn converged(&self) -> bool {
        self.a.items().await == self.b.items().await
    }
}

/// `count` peers on one network, ids `1..=count`.
pub async fn multi_peer_fixtures(count: u8, config: &ReconciliationConfig) -> (Arc<MemoryNetwork>, Vec<TestPeer>) {
    let network = MemoryNetwork::new();
    let mut peers = Vec::with_capacity(count as usize);
    for byte in 1..=count {
        peers.push(TestPeer::join(&network, byte, config).await);
    }
    (network, peers)
}

/// `n` distinct pseudo-random items from a fixed seed.
pub fn random_items(seed: u64, n: usize) -> Vec<ItemId> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut items = std::collections::BTreeSet::new();
    while items.len() < n {
        items.insert(ItemId(rng.gen()));
    }
    items.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrecon_sync::Transport;

    #[test]
    fn test_random_items_deterministic() {
        assert_eq!(random_items(7, 20), random_items(7, 20));
        assert_ne!(random_items(7, 20), random_items(8, 20));
        assert_eq!(random_items(1, 50).len(), 50);
    }

    #[tokio::test]
    async fn test_two_peers_converge() {
        let config = ReconciliationConfig::default();
        let a_items = random_items(1, 40);
        let mut b_items = a_items[..30].to_vec();
        b_items.extend(random_items(2, 5));

        let peers = TwoPeers::new(&config, &a_items, &b_items).await;
        assert!(!peers.converged().await);

        let server = peers.b.spawn_responder();
        let report = peers.a.driver.reconcile_with(&peers.b.id).await.unwrap();
        assert_eq!(report.local_only.len(), 10);
        assert_eq!(report.remote_only.len(), 5);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peers.converged().await);
        server.abort();
    }

    #[tokio::test]
    async fn test_multi_peer() {
        let (_network, peers) = multi_peer_fixtures(3, &ReconciliationConfig::default()).await;
        assert_eq!(peers.len(), 3);
        let transport = peers[0].driver.transport();
        assert_eq!(transport.connected_peers().await.unwrap().len(), 2);
    }
}
