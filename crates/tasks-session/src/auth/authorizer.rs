use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use tracing::{debug, warn};

use super::cache::CredentialCache;
use super::credentials::CredentialPair;

/// Attach `Authorization: Bearer <access>` when a pair is present.
///
/// Without a pair the request passes through untouched. Any existing
/// `Authorization` header is replaced, which is how retries pick up a
/// renewed token.
pub fn authorize(mut request: Request, pair: Option<&CredentialPair>) -> Request {
    let Some(pair) = pair else {
        debug!(method = %request.method(), url = %request.url(), "No credential, sending unauthenticated");
        return request;
    };

    match HeaderValue::from_str(&format!("Bearer {}", pair.access)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Err(_) => {
            warn!(url = %request.url(), "Access token is not a valid header value, sending unauthenticated");
        }
    }
    request
}

/// The bearer token a request was sent with, if any
pub fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Outgoing-request hook: reads the cache and attaches the access token.
#[derive(Clone)]
pub struct RequestAuthorizer {
    cache: Arc<CredentialCache>,
}

impl RequestAuthorizer {
    pub fn new(cache: Arc<CredentialCache>) -> Self {
        Self { cache }
    }

    pub async fn authorize(&self, request: Request) -> Request {
        let pair = self.cache.get().await;
        authorize(request, pair.as_deref())
    }
}
