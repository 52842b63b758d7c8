//! Authentication endpoints: sign-in, registration and the refresh exchange.
//!
//! These calls go out on the bare `reqwest::Client`, never through the
//! session-aware transport, so a 401 from the refresh endpoint cannot
//! trigger another renewal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{CredentialPair, RefreshExchange, RenewalError};

use super::ApiError;

const SIGN_IN_PATH: &str = "/auth/sign-in";
const REFRESH_PATH: &str = "/auth/refresh";
const REGISTRATION_PATH: &str = "/api/users/registration";

#[derive(Debug, Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

impl TokenResponse {
    fn into_pair(self) -> Option<CredentialPair> {
        if self.access_token.is_empty() || self.refresh_token.is_empty() {
            return None;
        }
        Some(CredentialPair::new(self.access_token, self.refresh_token))
    }
}

/// New account details for `/api/users/registration`
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub name: String,
    pub nick: String,
}

/// Client for the unauthenticated auth endpoints.
#[derive(Clone)]
pub struct AuthApi {
    client: Client,
    base_url: String,
}

impl AuthApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange email and password for a credential pair
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<CredentialPair> {
        let response = self
            .client
            .post(self.url(SIGN_IN_PATH))
            .json(&SignInRequest { email, password })
            .send()
            .await
            .context("Failed to send sign-in request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body).into());
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .context("Failed to parse sign-in response")?;
        tokens
            .into_pair()
            .ok_or_else(|| ApiError::InvalidResponse("Sign-in returned empty tokens".to_string()).into())
    }

    /// Create a new account. Does not sign in.
    pub async fn register(&self, registration: &Registration) -> Result<()> {
        let response = self
            .client
            .post(self.url(REGISTRATION_PATH))
            .json(registration)
            .send()
            .await
            .context("Failed to send registration request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body).into());
        }
        Ok(())
    }
}

#[async_trait]
impl RefreshExchange for AuthApi {
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, RenewalError> {
        debug!("Exchanging refresh token");
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RenewalError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenewalError::RejectedRefresh(status.as_u16()));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| RenewalError::InvalidRefreshResponse(e.to_string()))?;
        tokens
            .into_pair()
            .ok_or_else(|| RenewalError::InvalidRefreshResponse("empty token".to_string()))
    }
}
