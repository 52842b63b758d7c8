use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};

use super::session::StoredSession;
use super::store::TokenStore;

const SERVICE_NAME: &str = "tasks-session";

/// Access and refresh tokens, always replaced together.
///
/// Both values are opaque bearer strings. `Debug` redacts them so a pair can
/// appear in log fields without leaking secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Token store backed by the OS keychain.
pub struct KeyringTokenStore {
    namespace: String,
}

impl KeyringTokenStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn entry(namespace: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, namespace).context("Failed to create keyring entry")
    }

    /// Read the raw stored record from the keychain
    async fn read(&self) -> Result<Option<StoredSession>> {
        let namespace = self.namespace.clone();
        tokio::task::spawn_blocking(move || {
            let entry = Self::entry(&namespace)?;
            match entry.get_password() {
                Ok(json) => {
                    let stored: StoredSession = serde_json::from_str(&json)
                        .context("Failed to parse credentials from keychain")?;
                    Ok(Some(stored))
                }
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e).context("Failed to retrieve credentials from keychain"),
            }
        })
        .await
        .context("Keychain task failed")?
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn load(&self) -> Result<Option<CredentialPair>> {
        Ok(self.read().await?.map(StoredSession::into_pair))
    }

    async fn save(&self, pair: &CredentialPair) -> Result<()> {
        let namespace = self.namespace.clone();
        let json = serde_json::to_string(&StoredSession::new(pair))?;
        tokio::task::spawn_blocking(move || {
            Self::entry(&namespace)?
                .set_password(&json)
                .context("Failed to store credentials in keychain")
        })
        .await
        .context("Keychain task failed")?
    }

    async fn clear(&self) -> Result<()> {
        let namespace = self.namespace.clone();
        tokio::task::spawn_blocking(move || match Self::entry(&namespace)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credentials from keychain"),
        })
        .await
        .context("Keychain task failed")?
    }

    async fn saved_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read().await?.map(|stored| stored.saved_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_tokens() {
        let pair = CredentialPair::new("secret-access", "secret-refresh");
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("<redacted>"));
    }
}
