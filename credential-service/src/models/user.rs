use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A user record as returned by the user directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    /// Soft-delete marker.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DirectoryUser {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// The caller identity resolved from an access token. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    #[schema(example = 42)]
    pub id: i64,
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    pub is_admin: bool,
    pub is_blocked: bool,
}

impl From<DirectoryUser> for AuthenticatedUser {
    fn from(user: DirectoryUser) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            is_admin: user.is_admin,
            is_blocked: user.is_blocked,
        }
    }
}
