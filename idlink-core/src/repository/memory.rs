//! In-memory identity store
//!
//! All records live behind one mutex, so `link_provider_account` is atomic in
//! the same way the Postgres transaction is.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{AccountLink, IdentityStore, LinkedAccount};
use crate::{
    models::{AuthIdentity, ConnectionId, IdentityId, Profile, ProviderConnection},
    Error, Result,
};

#[derive(Default)]
struct Records {
    auths: HashMap<IdentityId, AuthIdentity>,
    profiles: HashMap<IdentityId, Profile>,
    connections: HashMap<(String, String), ProviderConnection>,
}

impl Records {
    fn live_auth_by_email(&self, email: &str) -> Option<&AuthIdentity> {
        self.auths
            .values()
            .find(|a| a.deleted_at.is_none() && a.email == email)
    }

    fn live_profile_by_email(&self, email: &str) -> Option<&Profile> {
        self.profiles
            .values()
            .find(|p| p.deleted_at.is_none() && p.email == email)
    }

    fn live_profile_by_email_mut(&mut self, email: &str) -> Option<&mut Profile> {
        self.profiles
            .values_mut()
            .find(|p| p.deleted_at.is_none() && p.email == email)
    }

    fn connection_by_id_mut(&mut self, id: &ConnectionId) -> Option<&mut ProviderConnection> {
        self.connections.values_mut().find(|c| &c.id == id)
    }
}

/// Identity store kept in process memory
#[derive(Clone, Default)]
pub struct MemoryIdentityStore {
    records: Arc<Mutex<Records>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn auth_count(&self) -> usize {
        self.records.lock().auths.len()
    }

    #[must_use]
    pub fn profile_count(&self) -> usize {
        self.records.lock().profiles.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.records.lock().connections.len()
    }
}

impl std::fmt::Debug for MemoryIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let records = self.records.lock();
        f.debug_struct("MemoryIdentityStore")
            .field("auths", &records.auths.len())
            .field("profiles", &records.profiles.len())
            .field("connections", &records.connections.len())
            .finish()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_auth_by_id(&self, id: &IdentityId) -> Result<AuthIdentity> {
        self.records
            .lock()
            .auths
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("auth identity {id}")))
    }

    async fn find_auth_by_email(&self, email: &str) -> Result<AuthIdentity> {
        self.records
            .lock()
            .live_auth_by_email(email)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("auth identity with email {email}")))
    }

    async fn find_connection_by_provider_key(
        &self,
        provider_name: &str,
        provider_user_id: &str,
    ) -> Result<ProviderConnection> {
        self.records
            .lock()
            .connections
            .get(&(provider_name.to_string(), provider_user_id.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{provider_name} connection {provider_user_id}")))
    }

    async fn create_auth(&self, identity: &AuthIdentity) -> Result<AuthIdentity> {
        let mut records = self.records.lock();
        if records.auths.contains_key(&identity.id) || records.live_auth_by_email(&identity.email).is_some() {
            return Err(Error::AlreadyExists(format!("auth identity with email {}", identity.email)));
        }
        records.auths.insert(identity.id.clone(), identity.clone());
        Ok(identity.clone())
    }

    async fn update_auth(&self, identity: &AuthIdentity) -> Result<AuthIdentity> {
        let mut records = self.records.lock();
        let stored = records
            .auths
            .get_mut(&identity.id)
            .ok_or_else(|| Error::NotFound(format!("auth identity {}", identity.id)))?;
        stored.password_hash.clone_from(&identity.password_hash);
        stored.status = identity.status;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Profile> {
        self.records
            .lock()
            .live_profile_by_email(email)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("profile with email {email}")))
    }

    async fn create_profile(&self, profile: &Profile) -> Result<Profile> {
        let mut records = self.records.lock();
        if records.profiles.contains_key(&profile.id) || records.live_profile_by_email(&profile.email).is_some() {
            return Err(Error::AlreadyExists(format!("profile with email {}", profile.email)));
        }
        records.profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile.clone())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<Profile> {
        let mut records = self.records.lock();
        let stored = records
            .profiles
            .get_mut(&profile.id)
            .ok_or_else(|| Error::NotFound(format!("profile {}", profile.id)))?;
        stored.name.clone_from(&profile.name);
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn create_connection(&self, connection: &ProviderConnection) -> Result<ProviderConnection> {
        let mut records = self.records.lock();
        if !records.auths.contains_key(&connection.identity_id) {
            return Err(Error::NotFound(format!("auth identity {}", connection.identity_id)));
        }
        let key = (connection.provider_name.clone(), connection.provider_user_id.clone());
        if records.connections.contains_key(&key) {
            return Err(Error::AlreadyExists(format!(
                "{} connection {}",
                connection.provider_name, connection.provider_user_id
            )));
        }
        records.connections.insert(key, connection.clone());
        Ok(connection.clone())
    }

    async fn update_connection(&self, connection: &ProviderConnection) -> Result<ProviderConnection> {
        let mut records = self.records.lock();
        let stored = records
            .connection_by_id_mut(&connection.id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", connection.id)))?;
        stored.email.clone_from(&connection.email);
        stored.name.clone_from(&connection.name);
        stored.access_token.clone_from(&connection.access_token);
        stored.refresh_token.clone_from(&connection.refresh_token);
        stored.expires_at = connection.expires_at;
        stored.updated_at = connection.updated_at;
        Ok(stored.clone())
    }

    async fn link_provider_account(&self, link: &AccountLink) -> Result<LinkedAccount> {
        let mut records = self.records.lock();
        let now = Utc::now();

        // A new auth record takes the profile id; refuse before writing anything
        if records.live_auth_by_email(&link.email).is_none() {
            if let Some(profile) = records.live_profile_by_email(&link.email) {
                if records.auths.contains_key(&profile.id) {
                    return Err(Error::AlreadyExists(format!("auth identity {}", profile.id)));
                }
            }
        }

        let profile = match records.live_profile_by_email_mut(&link.email) {
            Some(profile) => {
                profile.name.clone_from(&link.name);
                profile.updated_at = now;
                profile.clone()
            }
            None => {
                let profile = Profile::new(IdentityId::new(), link.email.clone(), link.name.clone());
                records.profiles.insert(profile.id.clone(), profile.clone());
                profile
            }
        };

        let (mut identity, identity_created) = match records.live_auth_by_email(&link.email).map(|a| a.id.clone()) {
            Some(id) => {
                let identity = records
                    .auths
                    .get_mut(&id)
                    .ok_or_else(|| Error::Internal(format!("auth identity {id} vanished")))?;
                identity.updated_at = now;
                (identity.clone(), false)
            }
            None => {
                let identity = AuthIdentity::provider_only(profile.id.clone(), link.email.clone());
                records.auths.insert(identity.id.clone(), identity.clone());
                (identity, true)
            }
        };

        let key = (link.provider_name.clone(), link.provider_user_id.clone());
        let (connection, connection_created) = match records.connections.get_mut(&key) {
            Some(connection) => {
                connection.email.clone_from(&link.email);
                connection.name.clone_from(&link.name);
                connection.rotate_tokens(link.access_token.clone(), link.refresh_token.clone(), link.expires_at);
                (connection.clone(), false)
            }
            None => {
                let connection = ProviderConnection {
                    id: ConnectionId::new(),
                    identity_id: identity.id.clone(),
                    provider_name: link.provider_name.clone(),
                    provider_user_id: link.provider_user_id.clone(),
                    email: link.email.clone(),
                    name: link.name.clone(),
                    access_token: link.access_token.clone(),
                    refresh_token: link.refresh_token.clone(),
                    expires_at: link.expires_at,
                    created_at: now,
                    updated_at: now,
                };
                records.connections.insert(key, connection.clone());
                (connection, true)
            }
        };

        if connection.identity_id != identity.id {
            identity = records
                .auths
                .get(&connection.identity_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("auth identity {}", connection.identity_id)))?;
        }

        Ok(LinkedAccount {
            identity,
            profile,
            connection,
            identity_created,
            connection_created,
        })
    }
}
