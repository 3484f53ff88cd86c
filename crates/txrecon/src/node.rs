//! The Node: one peer's transaction pool and its reconciliation machinery.
//!
//! The Node brings together the item store, the transport and the
//! reconciliation driver, and picks the partners to reconcile with.

use std::sync::Arc;

use bytes::Bytes;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use txrecon_core::{ItemId, PeerId, ReconciliationConfig};
use txrecon_store::ItemStore;
use txrecon_sync::{
    store_digest, verify_convergence, ConvergenceResult, ReconciliationDriver, SyncConfig,
    SyncReport, Transport,
};

use crate::error::{NodeError, Result};

/// Which flow [`Node::reconcile_with`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Round-based partitioned banks with an explicit-id fallback.
    #[default]
    Partitioned,
    /// One sketch of the configured kind per exchange.
    SingleSketch,
}

/// Configuration for the Node.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub reconciliation: ReconciliationConfig,
    pub sync: SyncConfig,
    pub mode: SyncMode,
}

/// The main Node struct.
///
/// Provides a unified API for:
/// - Adding transactions to the local pool
/// - Reconciling with a peer in either flow
/// - Answering peers' reconciliation requests
/// - Choosing partners each tick
pub struct Node<S: ItemStore, T: Transport> {
    driver: Arc<ReconciliationDriver<S, T>>,
    config: NodeConfig,
}

impl<S: ItemStore, T: Transport> Node<S, T> {
    /// Create a new node. Fails if the reconciliation config is invalid.
    pub fn new(store: S, transport: T, config: NodeConfig) -> Result<Self> {
        config.reconciliation.validate()?;
        let driver = ReconciliationDriver::new(
            store,
            transport,
            config.reconciliation.clone(),
            config.sync.clone(),
        );
        Ok(Self {
            driver: Arc::new(driver),
            config,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.driver.local_peer_id()
    }

    pub fn store(&self) -> &S {
        self.driver.store()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn driver(&self) -> &Arc<ReconciliationDriver<S, T>> {
        &self.driver
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pool Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a transaction to the local pool. Idempotent.
    pub async fn add_transaction(&self, tx: impl Into<Bytes>) -> Result<ItemId> {
        let tx = tx.into();
        if tx.is_empty() {
            return Err(NodeError::InvalidOperation("empty transaction".into()));
        }
        let (item, _) = self.driver.add_transaction(tx).await?;
        Ok(item)
    }

    /// Add a bare item id to the local pool.
    pub async fn add_item(&self, item: ItemId) -> Result<bool> {
        Ok(self.driver.add_item(item).await?)
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store().len().await?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    /// Reconcile with one peer using the configured flow.
    pub async fn reconcile_with(&self, peer: &PeerId) -> Result<SyncReport> {
        if *peer == self.peer_id() {
            return Err(NodeError::InvalidOperation("cannot reconcile with self".into()));
        }
        let report = match self.config.mode {
            SyncMode::Partitioned => self.driver.reconcile_with(peer).await?,
            SyncMode::SingleSketch => self.driver.reconcile_single(peer).await?,
        };
        Ok(report)
    }

    /// Answer one incoming message. Returns false if none arrived in time.
    pub async fn serve_one(&self) -> Result<bool> {
        Ok(self.driver.serve_one().await?)
    }

    /// Pick up to `recon_fanout` reachable peers whose last known clock
    /// suggests a session is worthwhile.
    pub async fn select_partners(&self) -> Result<Vec<PeerId>> {
        let mut candidates = Vec::new();
        for peer in self.driver.transport().connected_peers().await? {
            if self.driver.should_reconcile(&peer).await? {
                candidates.push(peer);
            }
        }
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(self.config.reconciliation.recon_fanout);
        Ok(candidates)
    }

    /// One reconciliation tick: reconcile with each selected partner.
    ///
    /// A failed session is logged and skipped; the tick carries on with
    /// the remaining partners.
    pub async fn tick(&self) -> Result<Vec<(PeerId, SyncReport)>> {
        let mut reports = Vec::new();
        for peer in self.select_partners().await? {
            match self.reconcile_with(&peer).await {
                Ok(report) => reports.push((peer, report)),
                Err(e) => tracing::warn!(%peer, error = %e, "reconciliation failed"),
            }
        }
        Ok(reports)
    }

    /// Digest of the local pool, for convergence checks.
    pub async fn digest(&self) -> Result<[u8; 32]> {
        Ok(store_digest(self.store()).await?)
    }

    /// Compare the local pool against a peer's size and digest.
    pub async fn verify_convergence(&self, remote_len: usize, remote_digest: &[u8; 32]) -> Result<ConvergenceResult> {
        Ok(verify_convergence(self.store(), remote_len, remote_digest).await?)
    }
}

impl<S: ItemStore + 'static, T: Transport + 'static> Node<S, T> {
    /// Serve incoming messages in the background until the peer stays
    /// quiet for a whole `message_timeout` or the transport fails.
    pub fn spawn_responder(&self) -> tokio::task::JoinHandle<()> {
        let driver = Arc::clone(&self.driver);
        tokio::spawn(async move {
            loop {
                match driver.serve_one().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "responder stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Run ticks every `recon_freq_ms` until `shutdown` flips to true.
    pub fn spawn_ticker(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(node.config.reconciliation.recon_interval());
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = node.tick().await {
                            tracing::warn!(error = %e, "reconciliation tick failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

impl<S: ItemStore, T: Transport> Clone for Node<S, T> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use txrecon_store::MemoryStore;
    use txrecon_sync::{MemoryNetwork, MemoryTransport};

    type TestNode = Node<MemoryStore, MemoryTransport>;

    async fn join(network: &Arc<MemoryNetwork>, byte: u8, config: &NodeConfig) -> TestNode {
        let transport = network.create_transport(PeerId::from_bytes([byte; 32])).await;
        let store = MemoryStore::from_config(&config.reconciliation);
        Node::new(store, transport, config.clone()).unwrap()
    }

    fn config() -> NodeConfig {
        NodeConfig {
            sync: SyncConfig {
                message_timeout: Duration::from_millis(500),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_transaction_is_idempotent() {
        let network = MemoryNetwork::new();
        let node = join(&network, 1, &config()).await;

        let id = node.add_transaction(&b"pay bob 5"[..]).await.unwrap();
        let again = node.add_transaction(&b"pay bob 5"[..]).await.unwrap();
        assert_eq!(id, again);
        assert_eq!(node.len().await.unwrap(), 1);
        assert_eq!(id, ItemId::from_tx_bytes(b"pay bob 5"));
        assert!(node.add_transaction(Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let network = MemoryNetwork::new();
        let transport = network.create_transport(PeerId::from_bytes([1; 32])).await;
        let mut bad = config();
        bad.reconciliation.n_cells = 0;
        let result = Node::new(MemoryStore::new(1, 0), transport, bad);
        assert!(matches!(result, Err(NodeError::Core(_))));
    }

    #[tokio::test]
    async fn test_cannot_reconcile_with_self() {
        let network = MemoryNetwork::new();
        let node = join(&network, 1, &config()).await;
        let err = node.reconcile_with(&node.peer_id()).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_select_partners_respects_fanout() {
        let network = MemoryNetwork::new();
        let mut cfg = config();
        cfg.reconciliation.recon_fanout = 2;
        let node = join(&network, 1, &cfg).await;
        let mut others = Vec::new();
        for byte in 2..=5 {
            others.push(join(&network, byte, &cfg).await);
        }

        let partners = node.select_partners().await.unwrap();
        assert_eq!(partners.len(), 2);
        assert!(!partners.contains(&node.peer_id()));
    }

    #[tokio::test]
    async fn test_tick_reconciles_and_skips_up_to_date_peers() {
        let network = MemoryNetwork::new();
        let a = join(&network, 1, &config()).await;
        let b = join(&network, 2, &config()).await;
        b.add_item(ItemId(42)).await.unwrap();
        let server = b.spawn_responder();

        let reports = a.tick().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.remote_only, vec![ItemId(42)]);
        assert!(a.store().contains(ItemId(42)).await.unwrap());

        // Same clocks now: nothing to gain from another session.
        assert!(a.select_partners().await.unwrap().is_empty());
        server.abort();
    }

    #[tokio::test]
    async fn test_ticker_stops_on_shutdown() {
        let network = MemoryNetwork::new();
        let mut cfg = config();
        cfg.reconciliation.recon_freq_ms = 10;
        let a = join(&network, 1, &cfg).await;
        let b = join(&network, 2, &cfg).await;
        b.add_item(ItemId(7)).await.unwrap();
        let server = b.spawn_responder();

        let (stop, shutdown) = tokio::sync::watch::channel(false);
        let ticker = a.spawn_ticker(shutdown);
        for _ in 0..100 {
            if a.store().contains(ItemId(7)).await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(a.store().contains(ItemId(7)).await.unwrap());

        stop.send(true).unwrap();
        ticker.await.unwrap();
        server.abort();
    }
}
