//! Persisted session storage.
//!
//! The session lives under three fixed keys in a synchronous key-value
//! store. Backends:
//! - `MemoryStore`: in-process only
//! - `FileStore`: JSON file in the cache directory
//! - `KeyringStore`: OS keychain entries

pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;

pub use self::file::FileStore;
pub use self::keychain::KeyringStore;
pub use self::memory::MemoryStore;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const SESSION_USER_KEY: &str = "session_user";

/// Every key written by a session, in clearing order.
pub const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_USER_KEY];

/// Synchronous string key-value storage for session data.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Remove every session key, attempting all of them even if one fails.
    fn clear_session(&self) -> Result<()> {
        let mut first_error = None;
        for key in SESSION_KEYS {
            if let Err(e) = self.remove(key) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
