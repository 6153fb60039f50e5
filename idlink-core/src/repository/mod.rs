//! Identity store: persistence for identities, profiles and provider connections
//!
//! `IdentityStore` is the seam the reconciliation engine talks to.
//! `PgIdentityStore` is the production implementation; `MemoryIdentityStore`
//! backs tests and database-less runs.

pub mod memory;
pub mod postgres;

pub use memory::MemoryIdentityStore;
pub use postgres::PgIdentityStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{AuthIdentity, IdentityId, Profile, ProviderConnection},
    Result,
};

/// Everything needed to attach a provider account to a local identity
#[derive(Clone, PartialEq, Eq)]
pub struct AccountLink {
    pub provider_name: String,
    pub provider_user_id: String,
    /// Normalized email, the merge key across providers
    pub email: String,
    pub name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AccountLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLink")
            .field("provider_name", &self.provider_name)
            .field("provider_user_id", &self.provider_user_id)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Result of `link_provider_account`
#[derive(Debug, Clone)]
pub struct LinkedAccount {
    pub identity: AuthIdentity,
    pub profile: Profile,
    pub connection: ProviderConnection,
    /// A new `AuthIdentity` was created (first login for this email)
    pub identity_created: bool,
    /// A new connection row was created (first login through this provider account)
    pub connection_created: bool,
}

/// Persistence contract of the reconciliation engine
///
/// Every lookup miss is a `NotFound` naming what was missing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_auth_by_id(&self, id: &IdentityId) -> Result<AuthIdentity>;

    /// Live (non-deleted) identity with this email
    async fn find_auth_by_email(&self, email: &str) -> Result<AuthIdentity>;

    async fn find_connection_by_provider_key(
        &self,
        provider_name: &str,
        provider_user_id: &str,
    ) -> Result<ProviderConnection>;

    /// Fails with `AlreadyExists` if a live identity has the same email
    async fn create_auth(&self, identity: &AuthIdentity) -> Result<AuthIdentity>;

    /// Updates status and password hash; the email is immutable
    async fn update_auth(&self, identity: &AuthIdentity) -> Result<AuthIdentity>;

    async fn find_profile_by_email(&self, email: &str) -> Result<Profile>;

    async fn create_profile(&self, profile: &Profile) -> Result<Profile>;

    async fn update_profile(&self, profile: &Profile) -> Result<Profile>;

    /// Fails with `AlreadyExists` if the provider key is taken
    async fn create_connection(&self, connection: &ProviderConnection) -> Result<ProviderConnection>;

    /// Updates the email/name snapshot, tokens and expiry
    async fn update_connection(&self, connection: &ProviderConnection) -> Result<ProviderConnection>;

    /// Find-or-create the profile and identity for `link.email`, then
    /// find-or-create the connection for the provider key, atomically.
    ///
    /// Concurrent calls for the same email converge on one identity and one
    /// profile; concurrent calls for the same provider key on one connection.
    async fn link_provider_account(&self, link: &AccountLink) -> Result<LinkedAccount>;
}
