use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::credentials::CredentialPair;
use super::store::TokenStore;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Persisted form of a credential pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    pub saved_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn new(pair: &CredentialPair) -> Self {
        Self {
            access_token: pair.access.clone(),
            refresh_token: pair.refresh.clone(),
            saved_at: Utc::now(),
        }
    }

    pub fn into_pair(self) -> CredentialPair {
        CredentialPair::new(self.access_token, self.refresh_token)
    }
}

/// Human-readable age of a stored session, e.g. "5m ago"
pub fn age_display(saved_at: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - saved_at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}

/// Token store writing a JSON session file into the cache directory.
pub struct FileTokenStore {
    cache_dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    async fn read(&self) -> Result<Option<StoredSession>> {
        let path = self.session_path();
        if !tokio::fs::try_exists(&path)
            .await
            .context("Failed to check session file")?
        {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&path)
            .await
            .context("Failed to read session file")?;
        let stored: StoredSession =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(stored))
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<CredentialPair>> {
        Ok(self.read().await?.map(StoredSession::into_pair))
    }

    /// Writes to a temporary file and renames it over the session file so a
    /// crash never leaves a half-written pair behind.
    async fn save(&self, pair: &CredentialPair) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .context("Failed to create cache directory")?;
        let contents = serde_json::to_string_pretty(&StoredSession::new(pair))?;
        let path = self.session_path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .context("Failed to write session file")?;
        tokio::fs::rename(&tmp, &path)
            .await
            .context("Failed to replace session file")?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(self.session_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }

    async fn saved_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read().await?.map(|stored| stored.saved_at))
    }
}
