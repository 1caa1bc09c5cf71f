use thiserror::Error;

/// Outcome of a failed refresh, shared with every request waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Refresh token was rejected - sign in again")]
    Rejected,

    #[error("No refresh token stored - sign in again")]
    NoRefreshToken,

    #[error("Refresh response could not be read: {0}")]
    InvalidResponse(String),

    #[error("Could not reach the refresh endpoint: {0}")]
    Transport(String),

    #[error("Refresh request timed out")]
    Timeout,

    #[error("Refresh endpoint failed: {0}")]
    ServerError(String),

    #[error("Session was signed out while the refresh was pending")]
    Cancelled,

    #[error("A new sign-in replaced the session while the refresh was pending")]
    Superseded,

    #[error("Could not persist refreshed credentials: {0}")]
    Storage(String),
}

impl RefreshError {
    /// Terminal failures have already destroyed the stored credentials.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefreshError::Rejected
                | RefreshError::NoRefreshToken
                | RefreshError::InvalidResponse(_)
                | RefreshError::Cancelled
        )
    }
}
