//! Link between a local identity and one upstream provider account

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ConnectionId, IdentityId};

/// One provider account attached to an `AuthIdentity`
///
/// `(provider_name, provider_user_id)` is globally unique.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConnection {
    pub id: ConnectionId,
    pub identity_id: IdentityId,
    pub provider_name: String,
    pub provider_user_id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub access_token: String,
    #[serde(skip_serializing, default)]
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderConnection {
    /// Replace the stored tokens and expiry, touching `updated_at`.
    ///
    /// A missing refresh token keeps the one already stored.
    pub fn rotate_tokens(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.access_token = access_token;
        if refresh_token.is_some() {
            self.refresh_token = refresh_token;
        }
        self.expires_at = expires_at;
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl std::fmt::Debug for ProviderConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConnection")
            .field("id", &self.id)
            .field("identity_id", &self.identity_id)
            .field("provider_name", &self.provider_name)
            .field("provider_user_id", &self.provider_user_id)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn connection() -> ProviderConnection {
        let now = Utc::now();
        ProviderConnection {
            id: ConnectionId::new(),
            identity_id: IdentityId::new(),
            provider_name: "google".to_string(),
            provider_user_id: "1001".to_string(),
            email: "u@x.com".to_string(),
            name: "U".to_string(),
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            expires_at: Some(now + Duration::seconds(60)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_rotate_keeps_refresh_token_when_absent() {
        let mut conn = connection();
        conn.rotate_tokens("at-2".to_string(), None, None);
        assert_eq!(conn.access_token, "at-2");
        assert_eq!(conn.refresh_token.as_deref(), Some("rt-1"));
        assert!(conn.expires_at.is_none());

        conn.rotate_tokens("at-3".to_string(), Some("rt-3".to_string()), None);
        assert_eq!(conn.refresh_token.as_deref(), Some("rt-3"));
    }

    #[test]
    fn test_tokens_hidden_from_serialization_and_debug() {
        let conn = connection();
        let json = serde_json::to_string(&conn).unwrap();
        assert!(!json.contains("at-1"));
        assert!(!json.contains("rt-1"));
        let debug = format!("{conn:?}");
        assert!(!debug.contains("at-1"));
        assert!(!debug.contains("rt-1"));
    }

    #[test]
    fn test_is_expired() {
        let mut conn = connection();
        assert!(!conn.is_expired(Utc::now()));
        conn.expires_at = Some(Utc::now() - Duration::seconds(1));
        assert!(conn.is_expired(Utc::now()));
        conn.expires_at = None;
        assert!(!conn.is_expired(Utc::now()));
    }
}
