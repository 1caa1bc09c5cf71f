//! REST API client module for the photopass marketplace backend.
//!
//! This module provides the `ApiClient` for making calls that carry the
//! session's bearer token, transparently retrying once through a token
//! refresh when the backend answers 401.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiRequest, RegisterRequest};
pub use error::ApiError;
