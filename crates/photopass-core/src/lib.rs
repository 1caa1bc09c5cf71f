//! Core library for photopass.
//!
//! Provides the authenticated session used by every photopass front end:
//! credential storage, the silent-refresh [`SessionCoordinator`], and the
//! [`ApiClient`] that routes marketplace REST calls through it.

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;

pub use api::{ApiClient, ApiError, ApiRequest};
pub use auth::{AuthState, CredentialPair, RefreshError, SessionCoordinator, SessionUser, SignOutReason};
pub use config::Config;
pub use storage::{FileStore, KeyringStore, MemoryStore, SessionStore};
