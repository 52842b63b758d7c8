//! Authentication module for keeping the API session alive.
//!
//! This module provides:
//! - `CredentialCache`: the current access/refresh pair, in memory in front of a `TokenStore`
//! - `RequestAuthorizer`: attaches the access token to outgoing requests
//! - `SessionRenewer`: single-flight token renewal when a request comes back 401
//!
//! Stores are available for a JSON session file, the OS keychain, and memory.

pub mod authorizer;
pub mod cache;
pub mod credentials;
pub mod error;
pub mod renewer;
pub mod session;
pub mod store;

pub use authorizer::{authorize, bearer_token, RequestAuthorizer};
pub use cache::CredentialCache;
pub use credentials::{CredentialPair, KeyringTokenStore};
pub use error::RenewalError;
pub use renewer::{
    RefreshExchange, Renewal, ResponseChain, SessionExpired, SessionRenewer, MAX_PRIOR_ATTEMPTS,
};
pub use session::{age_display, FileTokenStore, StoredSession};
pub use store::{MemoryTokenStore, TokenStore};
