//! Session-aware API client for the Tasks REST API.
//!
//! `ApiClient` composes the request authorizer, the `reqwest` transport and
//! the session renewer: every request gets the current access token, and a
//! 401 is handed to the renewer before the caller sees it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::auth::{
    CredentialCache, Renewal, RequestAuthorizer, ResponseChain, SessionExpired, SessionRenewer,
    TokenStore,
};
use crate::config::Config;

use super::auth::{AuthApi, Registration};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Current user profile endpoint
pub const USER_PATH: &str = "/api/users/user";

/// API client for the Tasks backend.
/// Clone is cheap - all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    cache: Arc<CredentialCache>,
    authorizer: RequestAuthorizer,
    renewer: SessionRenewer,
    auth: AuthApi,
}

impl ApiClient {
    /// Create a client persisting credentials in `store`
    pub fn new(base_url: &str, timeout: Duration, store: Arc<dyn TokenStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let cache = Arc::new(CredentialCache::new(store));
        let auth = AuthApi::new(client.clone(), base_url.clone());
        let renewer = SessionRenewer::new(Arc::clone(&cache), Arc::new(auth.clone()));

        Ok(Self {
            client,
            base_url,
            authorizer: RequestAuthorizer::new(Arc::clone(&cache)),
            cache,
            renewer,
            auth,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
            config.token_store()?,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Receive an event whenever the session ends because renewal failed
    pub fn session_expired(&self) -> broadcast::Receiver<SessionExpired> {
        self.renewer.subscribe()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.cache.is_authenticated().await
    }

    /// When the stored credentials were last written
    pub async fn session_saved_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.cache.store().saved_at().await
    }

    // ===== Session =====

    /// Sign in and seed the credential cache
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<()> {
        let pair = self.auth.sign_in(email, password).await?;
        self.cache.set(pair).await?;
        info!("Signed in");
        Ok(())
    }

    pub async fn register(&self, registration: &Registration) -> Result<()> {
        self.auth.register(registration).await
    }

    /// Forget the current session. Does not publish a session-expired event.
    pub async fn logout(&self) -> Result<()> {
        self.cache.clear().await?;
        info!("Logged out");
        Ok(())
    }

    // ===== Transport =====

    /// Send a request with the current credential, renewing on 401.
    ///
    /// A 401 that cannot be recovered is returned as the response, so callers
    /// see the original failure.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let mut chain = ResponseChain::new();
        let mut request = self.authorizer.authorize(request).await;

        loop {
            let sent = request.try_clone();
            let url = request.url().clone();
            let response = self
                .client
                .execute(request)
                .await
                .map_err(ApiError::NetworkError)
                .with_context(|| format!("Failed to send request to {}", url))?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            chain.push(response.status());

            let Some(sent) = sent else {
                debug!(url = %url, "Unauthorized streaming request cannot be replayed");
                return Ok(response);
            };
            match self.renewer.handle_unauthorized(&sent, &chain).await {
                Renewal::Retry(retry) => {
                    debug!(url = %url, attempt = chain.len(), "Retrying with renewed credential");
                    request = retry;
                }
                Renewal::GiveUp(reason) => {
                    debug!(url = %url, reason = %reason, "Unauthorized, not retrying");
                    return Ok(response);
                }
            }
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Response> {
        let url = self.url(path);
        let mut builder = self.client.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let request = builder
            .build()
            .with_context(|| format!("Failed to build request to {}", url))?;
        let response = self.execute(request).await?;
        Self::check_response(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send::<()>(Method::GET, path, None).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(Method::POST, path, Some(body)).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(Method::PUT, path, Some(body)).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, path, None).await?;
        Ok(())
    }

    /// Fetch the signed-in user's profile as raw JSON
    pub async fn fetch_user(&self) -> Result<serde_json::Value> {
        self.get_json(USER_PATH).await
    }
}
