//! Local account records: the authenticable identity and its display profile

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::id::IdentityId;

/// Lifecycle status of an `AuthIdentity`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Active,
    Disabled,
}

impl AuthStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

impl FromStr for AuthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            _ => Err(format!("Unknown auth status: {s}")),
        }
    }
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The canonical authenticable account, independent of any provider
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub id: IdentityId,
    pub email: String,
    /// Empty for accounts that only ever signed in through a provider
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub status: AuthStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AuthIdentity {
    /// New provider-only identity (no password), active
    #[must_use]
    pub fn provider_only(id: IdentityId, email: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            password_hash: String::new(),
            status: AuthStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[must_use]
    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }
}

impl std::fmt::Debug for AuthIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthIdentity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &if self.has_password() { "<redacted>" } else { "" })
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("deleted_at", &self.deleted_at)
            .finish()
    }
}

/// Display-facing user data, at most one live profile per email
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: IdentityId,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Profile {
    #[must_use]
    pub fn new(id: IdentityId, email: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            name,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
