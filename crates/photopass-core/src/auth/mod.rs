//! Authentication module for managing the signed-in session.
//!
//! This module provides:
//! - `SessionCoordinator`: bearer attachment, deduplicated silent refresh and
//!   sign-out for one session
//! - `CredentialPair` / `SessionUser`: the persisted session data
//! - `token`: local, unverified JWT expiry checks
//!
//! The refresh token is only ever sent in the body of the refresh call.

pub mod coordinator;
pub mod error;
pub mod session;
pub mod token;

pub use coordinator::{AuthState, SessionCoordinator, SignOutReason};
pub use error::RefreshError;
pub use session::{AuthTokens, CredentialPair, SessionUser, StoredSessionUser};
