//! Authenticated HTTP session for the Tasks API.
//!
//! Keeps an access/refresh token pair, attaches the access token to every
//! request, and renews the pair exactly once per burst of 401 responses.
//! When renewal is impossible the session is cleared and a
//! [`SessionExpired`](auth::SessionExpired) event is published.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, AuthApi, Registration};
pub use auth::{
    CredentialCache, CredentialPair, RenewalError, RequestAuthorizer, SessionExpired,
    SessionRenewer, TokenStore,
};
pub use config::{Config, StoreKind};
