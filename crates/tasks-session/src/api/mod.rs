//! REST API module for the Tasks backend.
//!
//! This module provides the `ApiClient` for making authenticated requests,
//! and `AuthApi` for the sign-in, registration and token refresh endpoints.
//!
//! The API uses JWT bearer tokens: a short-lived access token on every
//! request and a refresh token exchanged at `/auth/refresh` when the access
//! token is rejected.

pub mod auth;
pub mod client;
pub mod error;

pub use auth::{AuthApi, Registration};
pub use client::ApiClient;
pub use error::ApiError;
