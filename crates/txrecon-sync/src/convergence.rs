//! Convergence verification.
//!
//! After reconciling, two peers can check they hold the same item set by
//! comparing a deterministic digest instead of the sets themselves.

use txrecon_core::ItemId;
use txrecon_store::ItemStore;

use crate::error::Result;

const SET_DIGEST_DOMAIN: &[u8] = b"txrecon-set-v0:";

/// Order-independent digest of an item set.
///
/// Algorithm:
/// 1. Sort and deduplicate the ids
/// 2. Hash: H = Blake3(domain || count || id_0 || id_1 || ...)
pub fn set_digest(items: &[ItemId]) -> [u8; 32] {
    let mut sorted = items.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut hasher = blake3::Hasher::new();
    hasher.update(SET_DIGEST_DOMAIN);
    hasher.update(&(sorted.len() as u64).to_le_bytes());
    for item in &sorted {
        hasher.update(&item.to_bytes());
    }
    *hasher.finalize().as_bytes()
}

/// Digest of everything in a store.
pub async fn store_digest<S: ItemStore>(store: &S) -> Result<[u8; 32]> {
    Ok(set_digest(&store.all_items().await?))
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both peers hold the same items.
    Converged,
    /// The sets still differ (another session may be needed).
    NotConverged { reason: String },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare the local store against a peer's item count and set digest.
pub async fn verify_convergence<S: ItemStore>(
    local_store: &S,
    remote_len: usize,
    remote_digest: &[u8; 32],
) -> Result<ConvergenceResult> {
    let local_len = local_store.len().await?;
    if local_len != remote_len {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!("item count mismatch: local={}, remote={}", local_len, remote_len),
        });
    }

    if &store_digest(local_store).await? != remote_digest {
        return Ok(ConvergenceResult::NotConverged {
            reason: "set digest mismatch".into(),
        });
    }

    Ok(ConvergenceResult::Converged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrecon_store::{ItemStoreExt, MemoryStore};

    async fn store_with(items: &[u64]) -> MemoryStore {
        let store = MemoryStore::new(8, 0);
        let ids: Vec<ItemId> = items.iter().copied().map(ItemId).collect();
        store.insert_all(&ids).await.unwrap();
        store
    }

    #[test]
    fn test_digest_ignores_order_and_duplicates() {
        let a = set_digest(&[ItemId(3), ItemId(1), ItemId(2)]);
        let b = set_digest(&[ItemId(1), ItemId(2), ItemId(3), ItemId(2)]);
        assert_eq!(a, b);
        assert_ne!(a, set_digest(&[ItemId(1), ItemId(2)]));
    }

    #[tokio::test]
    async fn test_convergence_verified() {
        let local = store_with(&[5, 6, 7]).await;
        let remote = store_with(&[7, 6, 5]).await;

        let digest = store_digest(&remote).await.unwrap();
        let result = verify_convergence(&local, 3, &digest).await.unwrap();
        assert!(result.is_converged());
    }

    #[tokio::test]
    async fn test_convergence_mismatch() {
        let local = store_with(&[5, 6, 7]).await;
        let remote = store_with(&[5, 6, 8]).await;
        let digest = store_digest(&remote).await.unwrap();

        let result = verify_convergence(&local, 3, &digest).await.unwrap();
        assert_eq!(
            result,
            ConvergenceResult::NotConverged {
                reason: "set digest mismatch".into()
            }
        );

        // Remote claims to have more.
        let result = verify_convergence(&local, 4, &digest).await.unwrap();
        assert!(!result.is_converged());
    }
}
