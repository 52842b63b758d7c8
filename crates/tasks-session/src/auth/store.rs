//! Persistence seam underneath the credential cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::credentials::CredentialPair;

/// Asynchronous key-value persistence for the credential pair.
///
/// Implementations are scoped to a namespace private to the session
/// subsystem; `save` always replaces the whole pair.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<CredentialPair>>;

    async fn save(&self, pair: &CredentialPair) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// When the stored pair was last written, if the backend tracks it.
    async fn saved_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    pair: Mutex<Option<(CredentialPair, DateTime<Utc>)>>,
    loads: AtomicUsize,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: Mutex::new(Some((pair, Utc::now()))),
            loads: AtomicUsize::new(0),
        }
    }

    /// Number of `load` calls served so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Current stored pair, bypassing the load counter
    pub fn peek(&self) -> Option<CredentialPair> {
        self.pair
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|(pair, _)| pair.clone()))
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<CredentialPair>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let guard = self.pair.lock().map_err(|_| anyhow!("Token store lock poisoned"))?;
        Ok(guard.as_ref().map(|(pair, _)| pair.clone()))
    }

    async fn save(&self, pair: &CredentialPair) -> Result<()> {
        let mut guard = self.pair.lock().map_err(|_| anyhow!("Token store lock poisoned"))?;
        *guard = Some((pair.clone(), Utc::now()));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.pair.lock().map_err(|_| anyhow!("Token store lock poisoned"))?;
        *guard = None;
        Ok(())
    }

    async fn saved_at(&self) -> Result<Option<DateTime<Utc>>> {
        let guard = self.pair.lock().map_err(|_| anyhow!("Token store lock poisoned"))?;
        Ok(guard.as_ref().map(|(_, at)| *at))
    }
}
