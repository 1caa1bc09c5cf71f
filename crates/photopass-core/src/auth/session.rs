use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version written alongside the stored session user.
/// Bump when `SessionUser` changes shape; older snapshots are discarded.
pub const SESSION_USER_SCHEMA_VERSION: u32 = 1;

/// Access/refresh token pair for one signed-in session.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Snapshot of the authenticated identity taken at sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: String,
    #[serde(alias = "username", alias = "name")]
    pub display_name: String,
    pub email: String,
    #[serde(default, alias = "photographer")]
    pub is_photographer: bool,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid user id: {}", other))),
    }
}

impl SessionUser {
    /// Role label for display
    pub fn role(&self) -> &'static str {
        if self.is_superuser {
            "superuser"
        } else if self.is_staff {
            "staff"
        } else if self.is_photographer {
            "photographer"
        } else {
            "customer"
        }
    }
}

/// Versioned envelope persisted under the session-user key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSessionUser {
    pub schema_version: u32,
    #[serde(flatten)]
    pub user: SessionUser,
}

impl StoredSessionUser {
    pub fn new(user: SessionUser) -> Self {
        Self {
            schema_version: SESSION_USER_SCHEMA_VERSION,
            user,
        }
    }

    /// Parse a stored snapshot, rejecting unknown versions and shapes.
    pub fn parse(raw: &str) -> Option<SessionUser> {
        let stored: StoredSessionUser = serde_json::from_str(raw).ok()?;
        if stored.schema_version != SESSION_USER_SCHEMA_VERSION {
            return None;
        }
        Some(stored.user)
    }
}

/// Body returned by the sign-in, registration and OAuth exchange endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokens {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
    pub user: SessionUser,
}

/// Body returned by the refresh endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}
