//! Authorization-failure handling: single-flight token renewal.
//!
//! When a response comes back 401 the transport hands the failed request to
//! [`SessionRenewer::handle_unauthorized`]. The first failure starts a
//! renewal episode that exchanges the cached refresh token for a new pair;
//! failures arriving while that exchange is in flight join the same episode
//! instead of issuing their own exchange. Every waiter gets the same outcome.
//!
//! Terminal outcomes clear the credential cache and publish one
//! [`SessionExpired`] event per episode.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Request, StatusCode};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::authorizer::{authorize, bearer_token};
use super::cache::CredentialCache;
use super::credentials::CredentialPair;
use super::error::RenewalError;

/// Prior attempts after which another 401 ends the session instead of
/// renewing again.
pub const MAX_PRIOR_ATTEMPTS: usize = 2;

/// Capacity of the session-expired broadcast channel
const EXPIRED_CHANNEL_CAPACITY: usize = 16;

type RenewalOutcome = Result<Arc<CredentialPair>, RenewalError>;
type Episode = Shared<BoxFuture<'static, RenewalOutcome>>;

/// Exchanges a refresh token for a new credential pair.
#[async_trait]
pub trait RefreshExchange: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, RenewalError>;
}

/// Published once per terminal renewal so the UI can route back to sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExpired {
    pub reason: RenewalError,
}

/// Responses received so far for one logical request, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ResponseChain {
    statuses: Vec<StatusCode>,
}

impl ResponseChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, status: StatusCode) {
        self.statuses.push(status);
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Attempts made before the most recent response
    pub fn prior_attempts(&self) -> usize {
        self.statuses.len().saturating_sub(1)
    }
}

/// What the transport should do with a 401.
#[derive(Debug)]
pub enum Renewal {
    /// Send this request, re-authorized with the current access token
    Retry(Request),
    /// Surface the 401 to the caller
    GiveUp(RenewalError),
}

struct Inner {
    cache: Arc<CredentialCache>,
    exchange: Arc<dyn RefreshExchange>,
    expired: broadcast::Sender<SessionExpired>,
    episode: Mutex<Option<Episode>>,
}

/// Authorization-failure hook. Cheap to clone; clones share episodes.
#[derive(Clone)]
pub struct SessionRenewer {
    inner: Arc<Inner>,
}

impl SessionRenewer {
    pub fn new(cache: Arc<CredentialCache>, exchange: Arc<dyn RefreshExchange>) -> Self {
        let (expired, _) = broadcast::channel(EXPIRED_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                cache,
                exchange,
                expired,
                episode: Mutex::new(None),
            }),
        }
    }

    /// Receive session-expired events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionExpired> {
        self.inner.expired.subscribe()
    }

    /// Decide whether a request that came back 401 should be retried.
    ///
    /// `request` is the request as it was sent, `chain` holds every response
    /// received for it so far including the current 401.
    pub async fn handle_unauthorized(&self, request: &Request, chain: &ResponseChain) -> Renewal {
        let Some(sent) = bearer_token(request) else {
            // Sign-in and registration failures land here; they are not a
            // session problem.
            debug!(url = %request.url(), "Unauthorized request carried no credential");
            return Renewal::GiveUp(RenewalError::NoCredential);
        };

        if chain.prior_attempts() >= MAX_PRIOR_ATTEMPTS {
            warn!(
                url = %request.url(),
                attempts = chain.len(),
                "Request still unauthorized after renewal, ending session"
            );
            let reason = self.inner.terminate(RenewalError::RetryCeilingExceeded).await;
            return Renewal::GiveUp(reason);
        }

        match self.current_or_renewed(sent).await {
            Ok(pair) => match request.try_clone() {
                Some(retry) => Renewal::Retry(authorize(retry, Some(&pair))),
                None => Renewal::GiveUp(RenewalError::NotRetryable),
            },
            Err(reason) => Renewal::GiveUp(reason),
        }
    }

    /// Join the running episode, reuse a pair that is already newer than
    /// `sent`, or start a new episode.
    async fn current_or_renewed(&self, sent: &str) -> RenewalOutcome {
        let episode = {
            let mut slot = self.inner.episode.lock().await;
            match slot.as_ref() {
                Some(episode) => {
                    debug!("Renewal in flight, waiting for it");
                    episode.clone()
                }
                None => {
                    let Some(current) = self.inner.cache.get().await else {
                        // Logged out, or an earlier episode already ended the
                        // session and signalled
                        debug!("Session already ended, not renewing");
                        return Err(RenewalError::SessionEnded);
                    };
                    if current.access != sent {
                        debug!("Credential renewed since request was sent, retrying with current pair");
                        return Ok(current);
                    }
                    let episode = Inner::start_episode(Arc::clone(&self.inner), current);
                    *slot = Some(episode.clone());
                    episode
                }
            }
        };
        episode.await
    }
}

impl Inner {
    /// Spawn the exchange so it runs to completion even if every waiter
    /// goes away. The slot is cleared even if the exchange panics.
    fn start_episode(inner: Arc<Inner>, expected: Arc<CredentialPair>) -> Episode {
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(inner.renew(expected))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(RenewalError::Interrupted("renewal panicked".to_string())));
            inner.episode.lock().await.take();
            outcome
        });
        handle
            .map(|joined| joined.unwrap_or_else(|e| Err(RenewalError::Interrupted(e.to_string()))))
            .boxed()
            .shared()
    }

    /// Exchange the refresh token of `expected`. The result is only written
    /// back if the cache still holds `expected`; a logout or another
    /// terminal failure during the exchange wins.
    async fn renew(&self, expected: Arc<CredentialPair>) -> RenewalOutcome {
        if expected.refresh.is_empty() {
            return Err(self.fail(&expected, RenewalError::MissingRefreshToken).await);
        }

        info!("Access token rejected, renewing session");
        match self.exchange.refresh(&expected.refresh).await {
            Ok(pair) => {
                let pair = Arc::new(pair);
                match self.cache.replace_if(&expected.refresh, (*pair).clone()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Session ended during renewal, discarding renewed credentials");
                        return Err(RenewalError::SessionEnded);
                    }
                    Err(e) => warn!(error = %e, "Renewed credentials kept in memory only"),
                }
                info!("Session renewed");
                Ok(pair)
            }
            Err(reason) => Err(self.fail(&expected, reason).await),
        }
    }

    /// End the session that `expected` belongs to, unless it already ended.
    async fn fail(&self, expected: &CredentialPair, reason: RenewalError) -> RenewalError {
        match self.cache.clear_if(&expected.refresh).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(reason = %reason, "Renewal failed after session already ended");
                return RenewalError::SessionEnded;
            }
            Err(e) => warn!(error = %e, "Failed to clear stored credentials"),
        }
        warn!(reason = %reason, "Session expired, credentials cleared");
        self.signal(reason)
    }

    async fn terminate(&self, reason: RenewalError) -> RenewalError {
        warn!(reason = %reason, "Session expired, clearing credentials");
        if let Err(e) = self.cache.clear().await {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        self.signal(reason)
    }

    fn signal(&self, reason: RenewalError) -> RenewalError {
        // No subscribers is fine
        let _ = self.expired.send(SessionExpired {
            reason: reason.clone(),
        });
        reason
    }
}
