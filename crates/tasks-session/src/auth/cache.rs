use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::credentials::CredentialPair;
use super::store::TokenStore;

enum Slot {
    /// Storage has not been read yet
    Unloaded,
    /// In-memory copy is authoritative
    Loaded(Option<Arc<CredentialPair>>),
}

/// In-memory copy of the credential pair in front of a persistent store.
///
/// The pair is held as a single `Arc` and replaced whole, so readers see
/// either the old pair or the new one. The store is read at most once;
/// after that the in-memory copy answers every `get`.
pub struct CredentialCache {
    store: Arc<dyn TokenStore>,
    slot: RwLock<Slot>,
}

impl CredentialCache {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            slot: RwLock::new(Slot::Unloaded),
        }
    }

    /// Current pair, loading it from storage on first use.
    ///
    /// A failed storage read is logged and reported as "no pair"; the next
    /// call tries the store again.
    pub async fn get(&self) -> Option<Arc<CredentialPair>> {
        if let Slot::Loaded(pair) = &*self.slot.read().await {
            return pair.clone();
        }

        let mut slot = self.slot.write().await;
        // Another caller may have loaded while we waited for the write lock
        if let Slot::Loaded(pair) = &*slot {
            return pair.clone();
        }

        match self.store.load().await {
            Ok(pair) => {
                debug!(found = pair.is_some(), "Loaded credentials from storage");
                let pair = pair.map(Arc::new);
                *slot = Slot::Loaded(pair.clone());
                pair
            }
            Err(e) => {
                warn!(error = %e, "Failed to load stored credentials");
                None
            }
        }
    }

    /// Replace the pair in memory and persist it.
    ///
    /// The in-memory swap happens first; a storage failure is returned but
    /// the new pair stays in effect for this process.
    pub async fn set(&self, pair: CredentialPair) -> Result<()> {
        let pair = Arc::new(pair);
        let mut slot = self.slot.write().await;
        *slot = Slot::Loaded(Some(Arc::clone(&pair)));
        self.store
            .save(&pair)
            .await
            .context("Failed to persist credentials")
    }

    /// Drop the pair from memory and storage.
    pub async fn clear(&self) -> Result<()> {
        let mut slot = self.slot.write().await;
        *slot = Slot::Loaded(None);
        self.store
            .clear()
            .await
            .context("Failed to clear stored credentials")
    }

    /// Replace the pair only if the cache still holds the one whose refresh
    /// token is `expected_refresh`.
    ///
    /// Returns `Ok(false)` and leaves the cache untouched when the session was
    /// cleared or replaced in the meantime. As with `set`, an error means the
    /// pair was swapped in memory but could not be persisted.
    pub async fn replace_if(&self, expected_refresh: &str, pair: CredentialPair) -> Result<bool> {
        let mut slot = self.slot.write().await;
        if !Self::holds(&slot, expected_refresh) {
            return Ok(false);
        }
        let pair = Arc::new(pair);
        *slot = Slot::Loaded(Some(Arc::clone(&pair)));
        self.store
            .save(&pair)
            .await
            .context("Failed to persist credentials")?;
        Ok(true)
    }

    /// Clear the pair only if the cache still holds the one whose refresh
    /// token is `expected_refresh`. Errors mean memory was cleared but
    /// storage was not.
    pub async fn clear_if(&self, expected_refresh: &str) -> Result<bool> {
        let mut slot = self.slot.write().await;
        if !Self::holds(&slot, expected_refresh) {
            return Ok(false);
        }
        *slot = Slot::Loaded(None);
        self.store
            .clear()
            .await
            .context("Failed to clear stored credentials")?;
        Ok(true)
    }

    fn holds(slot: &Slot, refresh: &str) -> bool {
        matches!(slot, Slot::Loaded(Some(current)) if current.refresh == refresh)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.get().await.is_some()
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryTokenStore;

    fn cache_with(store: &Arc<MemoryTokenStore>) -> CredentialCache {
        CredentialCache::new(Arc::clone(store) as Arc<dyn TokenStore>)
    }

    #[tokio::test]
    async fn test_get_reads_storage_once() {
        let store = Arc::new(MemoryTokenStore::with_pair(CredentialPair::new("a1", "r1")));
        let cache = cache_with(&store);

        for _ in 0..5 {
            let pair = cache.get().await.unwrap();
            assert_eq!(pair.access, "a1");
            assert_eq!(pair.refresh, "r1");
        }
        assert_eq!(store.load_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_storage_is_remembered() {
        let store = Arc::new(MemoryTokenStore::new());
        let cache = cache_with(&store);

        assert!(cache.get().await.is_none());
        assert!(cache.get().await.is_none());
        assert!(!cache.is_authenticated().await);
        assert_eq!(store.load_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_gets_share_one_load() {
        let store = Arc::new(MemoryTokenStore::with_pair(CredentialPair::new("a1", "r1")));
        let cache = Arc::new(cache_with(&store));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(store.load_count(), 1);
    }

    #[tokio::test]
    async fn test_set_replaces_pair_and_persists() {
        let store = Arc::new(MemoryTokenStore::with_pair(CredentialPair::new("a1", "r1")));
        let cache = cache_with(&store);
        assert_eq!(cache.get().await.unwrap().access, "a1");

        cache.set(CredentialPair::new("a2", "r2")).await.unwrap();

        let pair = cache.get().await.unwrap();
        assert_eq!(*pair, CredentialPair::new("a2", "r2"));
        assert_eq!(store.peek(), Some(CredentialPair::new("a2", "r2")));
        assert_eq!(store.load_count(), 1);
    }

    #[tokio::test]
    async fn test_set_before_any_get_skips_storage_read() {
        let store = Arc::new(MemoryTokenStore::with_pair(CredentialPair::new("old", "old")));
        let cache = cache_with(&store);

        cache.set(CredentialPair::new("a1", "r1")).await.unwrap();
        assert_eq!(cache.get().await.unwrap().access, "a1");
        assert_eq!(store.load_count(), 0);
    }

    #[tokio::test]
    async fn test_replace_if_requires_expected_pair() {
        let store = Arc::new(MemoryTokenStore::with_pair(CredentialPair::new("a1", "r1")));
        let cache = cache_with(&store);
        assert!(cache.is_authenticated().await);

        assert!(!cache.replace_if("r0", CredentialPair::new("x", "y")).await.unwrap());
        assert_eq!(cache.get().await.unwrap().access, "a1");

        assert!(cache.replace_if("r1", CredentialPair::new("a2", "r2")).await.unwrap());
        assert_eq!(*cache.get().await.unwrap(), CredentialPair::new("a2", "r2"));
        assert_eq!(store.peek(), Some(CredentialPair::new("a2", "r2")));
    }

    #[tokio::test]
    async fn test_replace_if_after_clear_keeps_session_ended() {
        let store = Arc::new(MemoryTokenStore::with_pair(CredentialPair::new("a1", "r1")));
        let cache = cache_with(&store);
        assert!(cache.is_authenticated().await);
        cache.clear().await.unwrap();

        assert!(!cache.replace_if("r1", CredentialPair::new("a2", "r2")).await.unwrap());
        assert!(cache.get().await.is_none());
        assert_eq!(store.peek(), None);
    }

    #[tokio::test]
    async fn test_clear_if_requires_expected_pair() {
        let store = Arc::new(MemoryTokenStore::with_pair(CredentialPair::new("a2", "r2")));
        let cache = cache_with(&store);
        assert!(cache.is_authenticated().await);

        assert!(!cache.clear_if("r1").await.unwrap());
        assert!(cache.is_authenticated().await);

        assert!(cache.clear_if("r2").await.unwrap());
        assert!(cache.get().await.is_none());
        assert_eq!(store.peek(), None);
    }

    /// Fails the first load, then behaves like an empty store
    #[derive(Default)]
    struct FlakyStore {
        loads: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TokenStore for FlakyStore {
        async fn load(&self) -> Result<Option<CredentialPair>> {
            if self.loads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                anyhow::bail!("permission denied");
            }
            Ok(Some(CredentialPair::new("a1", "r1")))
        }

        async fn save(&self, _pair: &CredentialPair) -> Result<()> {
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let store = Arc::new(FlakyStore::default());
        let cache = CredentialCache::new(Arc::clone(&store) as Arc<dyn TokenStore>);

        assert!(cache.get().await.is_none());
        assert_eq!(cache.get().await.unwrap().access, "a1");
        assert_eq!(store.loads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_then_get_returns_none() {
        let store = Arc::new(MemoryTokenStore::with_pair(CredentialPair::new("a1", "r1")));
        let cache = cache_with(&store);
        assert!(cache.is_authenticated().await);

        cache.clear().await.unwrap();

        assert!(cache.get().await.is_none());
        assert_eq!(store.peek(), None);
    }
}
