//! OAuth2 provider system: adapter trait, registry and CSRF state store
//!
//! # Architecture
//!
//! 1. **Provider**: one adapter per upstream (`google`, `github`), four operations
//! 2. **Registry**: provider name -> adapter, shared behind a reader/writer lock
//! 3. **Factory**: `providers::create_provider()` builds an adapter from its config section
//! 4. **State store**: state tokens issued with login URLs and consumed by callbacks

pub mod client;
pub mod config;
pub mod providers;
pub mod registry;
pub mod state;

pub use client::OAuth2Client;
pub use config::ProviderConfig;
pub use registry::ProviderRegistry;
pub use state::{IssuedState, StateStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

// ============================================================================
// Provider Trait
// ============================================================================

/// `OAuth2` provider adapter
///
/// All upstream providers present this contract regardless of their API shape.
/// None of the operations touch local state, so they are safe to retry.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider type identifier (e.g., "google", "github")
    fn provider_type(&self) -> &str;

    /// Build the authorization endpoint URL.
    ///
    /// Uses `redirect_override` as the redirect URI when given, the configured
    /// one otherwise. Never fails.
    fn auth_url(&self, redirect_override: Option<&str>, state: &str) -> String;

    /// Authorization-code grant.
    ///
    /// `redirect_override` must be the redirect URI the login URL was built with.
    async fn exchange_token(&self, code: &str, redirect_override: Option<&str>) -> Result<ProviderToken>;

    /// Refresh-token grant. The returned token always carries a refresh token:
    /// the provider's new one, or `refresh_token` itself when none was issued.
    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderToken>;

    /// Fetch the normalized identity claim for an access token
    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo>;
}

/// Token set returned by one exchange or refresh call
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds; `None` for non-expiring tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: String,
}

impl std::fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Identity claim reported by a provider for one access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUserInfo {
    /// Provider-assigned user id
    pub id: String,
    pub email: String,
    pub name: String,
}

impl ProviderUserInfo {
    /// Email as used for account linking: trimmed and lower-cased
    #[must_use]
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}
