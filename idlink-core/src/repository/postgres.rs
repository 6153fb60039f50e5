//! `PostgreSQL` identity store
//!
//! The find-or-create steps of account linking are single
//! `INSERT ... ON CONFLICT ... DO UPDATE ... RETURNING` statements against the
//! unique indexes in `migrations/`, run inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};

use super::{AccountLink, IdentityStore, LinkedAccount};
use crate::{
    models::{AuthIdentity, AuthStatus, ConnectionId, IdentityId, Profile, ProviderConnection},
    Error, Result,
};

const AUTH_COLUMNS: &str = "id, email, password_hash, status, created_at, updated_at, deleted_at";
const PROFILE_COLUMNS: &str = "id, email, name, created_at, updated_at, deleted_at";
const CONNECTION_COLUMNS: &str = "id, identity_id, provider_name, provider_user_id, email, name, \
     access_token, refresh_token, expires_at, created_at, updated_at";

/// Identity store backed by a `PgPool`
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl std::fmt::Debug for PgIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgIdentityStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_auth_by_id(&self, id: &IdentityId) -> Result<AuthIdentity> {
        let row = sqlx::query_as::<_, AuthRow>(&format!("SELECT {AUTH_COLUMNS} FROM auth_identities WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::NotFound(format!("auth identity {id}")))?.try_into()
    }

    async fn find_auth_by_email(&self, email: &str) -> Result<AuthIdentity> {
        let row = sqlx::query_as::<_, AuthRow>(&format!(
            "SELECT {AUTH_COLUMNS} FROM auth_identities WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("auth identity with email {email}")))?.try_into()
    }

    async fn find_connection_by_provider_key(
        &self,
        provider_name: &str,
        provider_user_id: &str,
    ) -> Result<ProviderConnection> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM provider_connections WHERE provider_name = $1 AND provider_user_id = $2"
        ))
        .bind(provider_name)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| Error::NotFound(format!("{provider_name} connection {provider_user_id}")))
    }

    async fn create_auth(&self, identity: &AuthIdentity) -> Result<AuthIdentity> {
        sqlx::query_as::<_, AuthRow>(&format!(
            "INSERT INTO auth_identities (id, email, password_hash, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {AUTH_COLUMNS}"
        ))
        .bind(&identity.id)
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(identity.status.as_str())
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .fetch_one(&self.pool)
        .await?
        .try_into()
    }

    async fn update_auth(&self, identity: &AuthIdentity) -> Result<AuthIdentity> {
        let row = sqlx::query_as::<_, AuthRow>(&format!(
            "UPDATE auth_identities
             SET password_hash = $2, status = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {AUTH_COLUMNS}"
        ))
        .bind(&identity.id)
        .bind(&identity.password_hash)
        .bind(identity.status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("auth identity {}", identity.id)))?.try_into()
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Profile> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| Error::NotFound(format!("profile with email {email}")))
    }

    async fn create_profile(&self, profile: &Profile) -> Result<Profile> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "INSERT INTO profiles (id, email, name, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(&profile.id)
        .bind(&profile.email)
        .bind(&profile.name)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<Profile> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "UPDATE profiles SET name = $2, updated_at = NOW() WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(&profile.id)
        .bind(&profile.name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| Error::NotFound(format!("profile {}", profile.id)))
    }

    async fn create_connection(&self, connection: &ProviderConnection) -> Result<ProviderConnection> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "INSERT INTO provider_connections
                (id, identity_id, provider_name, provider_user_id, email, name,
                 access_token, refresh_token, expires_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {CONNECTION_COLUMNS}"
        ))
        .bind(connection.id.as_str())
        .bind(&connection.identity_id)
        .bind(&connection.provider_name)
        .bind(&connection.provider_user_id)
        .bind(&connection.email)
        .bind(&connection.name)
        .bind(&connection.access_token)
        .bind(&connection.refresh_token)
        .bind(connection.expires_at)
        .bind(connection.created_at)
        .bind(connection.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn update_connection(&self, connection: &ProviderConnection) -> Result<ProviderConnection> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "UPDATE provider_connections
             SET email = $2, name = $3, access_token = $4, refresh_token = $5,
                 expires_at = $6, updated_at = $7
             WHERE id = $1
             RETURNING {CONNECTION_COLUMNS}"
        ))
        .bind(connection.id.as_str())
        .bind(&connection.email)
        .bind(&connection.name)
        .bind(&connection.access_token)
        .bind(&connection.refresh_token)
        .bind(connection.expires_at)
        .bind(connection.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| Error::NotFound(format!("connection {}", connection.id)))
    }

    async fn link_provider_account(&self, link: &AccountLink) -> Result<LinkedAccount> {
        let mut tx = self.pool.begin().await?;

        let profile = upsert_profile(&mut *tx, link).await?;
        let (mut identity, identity_created) = upsert_auth(&mut *tx, &profile.id, &link.email).await?;
        let (connection, connection_created) = upsert_connection(&mut *tx, &identity.id, link).await?;

        // A concurrent first login for this provider account may have won the
        // connection insert; the connection keeps pointing at its owner.
        if connection.identity_id != identity.id {
            identity = sqlx::query_as::<_, AuthRow>(&format!(
                "SELECT {AUTH_COLUMNS} FROM auth_identities WHERE id = $1"
            ))
            .bind(&connection.identity_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("auth identity {}", connection.identity_id)))?
            .try_into()?;
        }

        tx.commit().await?;

        Ok(LinkedAccount {
            identity,
            profile,
            connection,
            identity_created,
            connection_created,
        })
    }
}

async fn upsert_profile(conn: &mut PgConnection, link: &AccountLink) -> Result<Profile> {
    let row = sqlx::query_as::<_, ProfileRow>(&format!(
        "INSERT INTO profiles (id, email, name)
         VALUES ($1, $2, $3)
         ON CONFLICT (email) WHERE deleted_at IS NULL
         DO UPDATE SET name = EXCLUDED.name, updated_at = NOW()
         RETURNING {PROFILE_COLUMNS}"
    ))
    .bind(IdentityId::new())
    .bind(&link.email)
    .bind(&link.name)
    .fetch_one(conn)
    .await?;

    Ok(row.into())
}

/// Existing identities only have `updated_at` touched; the email never changes.
async fn upsert_auth(conn: &mut PgConnection, id: &IdentityId, email: &str) -> Result<(AuthIdentity, bool)> {
    let row = sqlx::query_as::<_, UpsertedAuthRow>(&format!(
        "INSERT INTO auth_identities (id, email, password_hash, status)
         VALUES ($1, $2, '', $3)
         ON CONFLICT (email) WHERE deleted_at IS NULL
         DO UPDATE SET updated_at = NOW()
         RETURNING {AUTH_COLUMNS}, (xmax = 0) AS inserted"
    ))
    .bind(id)
    .bind(email)
    .bind(AuthStatus::Active.as_str())
    .fetch_one(conn)
    .await?;

    Ok((row.auth.try_into()?, row.inserted))
}

/// Keeps the owning identity and the stored refresh token when the row exists.
async fn upsert_connection(
    conn: &mut PgConnection,
    identity_id: &IdentityId,
    link: &AccountLink,
) -> Result<(ProviderConnection, bool)> {
    let row = sqlx::query_as::<_, UpsertedConnectionRow>(&format!(
        "INSERT INTO provider_connections
            (id, identity_id, provider_name, provider_user_id, email, name,
             access_token, refresh_token, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (provider_name, provider_user_id)
         DO UPDATE SET
            email = EXCLUDED.email,
            name = EXCLUDED.name,
            access_token = EXCLUDED.access_token,
            refresh_token = COALESCE(EXCLUDED.refresh_token, provider_connections.refresh_token),
            expires_at = EXCLUDED.expires_at,
            updated_at = NOW()
         RETURNING {CONNECTION_COLUMNS}, (xmax = 0) AS inserted"
    ))
    .bind(ConnectionId::new().as_str())
    .bind(identity_id)
    .bind(&link.provider_name)
    .bind(&link.provider_user_id)
    .bind(&link.email)
    .bind(&link.name)
    .bind(&link.access_token)
    .bind(&link.refresh_token)
    .bind(link.expires_at)
    .fetch_one(conn)
    .await?;

    Ok((row.connection.into(), row.inserted))
}

/// Row representation for SQL queries (status as TEXT)
#[derive(FromRow)]
struct AuthRow {
    id: IdentityId,
    email: String,
    password_hash: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<AuthRow> for AuthIdentity {
    type Error = Error;

    fn try_from(row: AuthRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse().map_err(Error::Internal)?,
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct UpsertedAuthRow {
    #[sqlx(flatten)]
    auth: AuthRow,
    inserted: bool,
}

#[derive(FromRow)]
struct ProfileRow {
    id: IdentityId,
    email: String,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(FromRow)]
struct ConnectionRow {
    id: String,
    identity_id: IdentityId,
    provider_name: String,
    provider_user_id: String,
    email: String,
    name: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConnectionRow> for ProviderConnection {
    fn from(row: ConnectionRow) -> Self {
        Self {
            id: ConnectionId(row.id),
            identity_id: row.identity_id,
            provider_name: row.provider_name,
            provider_user_id: row.provider_user_id,
            email: row.email,
            name: row.name,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct UpsertedConnectionRow {
    #[sqlx(flatten)]
    connection: ConnectionRow,
    inserted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn store() -> PgIdentityStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("../migrations").run(&pool).await.unwrap();
        PgIdentityStore::new(pool)
    }

    fn link(provider: &str, provider_user_id: &str, email: &str) -> AccountLink {
        AccountLink {
            provider_name: provider.to_string(),
            provider_user_id: provider_user_id.to_string(),
            email: email.to_string(),
            name: "Test User".to_string(),
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        }
    }

    fn unique_email() -> String {
        format!("{}@idlink.test", nanoid::nanoid!(10).to_lowercase())
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_link_creates_then_reuses() {
        let store = store().await;
        let email = unique_email();
        let key = nanoid::nanoid!(8);

        let first = store.link_provider_account(&link("google", &key, &email)).await.unwrap();
        assert!(first.identity_created);
        assert!(first.connection_created);
        assert_eq!(first.identity.id, first.profile.id);
        assert!(!first.identity.has_password());

        let mut again = link("google", &key, &email);
        again.refresh_token = None;
        let second = store.link_provider_account(&again).await.unwrap();
        assert!(!second.identity_created);
        assert!(!second.connection_created);
        assert_eq!(second.identity.id, first.identity.id);
        assert_eq!(second.connection.id, first.connection.id);
        assert_eq!(second.connection.refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_link_merges_providers_by_email() {
        let store = store().await;
        let email = unique_email();

        let google = store.link_provider_account(&link("google", &nanoid::nanoid!(8), &email)).await.unwrap();
        let github = store.link_provider_account(&link("github", &nanoid::nanoid!(8), &email)).await.unwrap();

        assert_eq!(google.identity.id, github.identity.id);
        assert!(github.connection_created);
        assert!(!github.identity_created);
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_concurrent_links_converge() {
        let store = Arc::new(store().await);
        let email = unique_email();
        let key = nanoid::nanoid!(8);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let link = link("google", &key, &email);
            handles.push(tokio::spawn(async move { store.link_provider_account(&link).await }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap().identity.id);
        }
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_lookups_report_not_found() {
        let store = store().await;

        let err = store.find_auth_by_email(&unique_email()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = store.find_connection_by_provider_key("google", "missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = store.find_auth_by_id(&IdentityId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_create_auth_duplicate_email() {
        let store = store().await;
        let email = unique_email();

        store.create_auth(&AuthIdentity::provider_only(IdentityId::new(), email.clone())).await.unwrap();
        let err = store
            .create_auth(&AuthIdentity::provider_only(IdentityId::new(), email))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_update_connection_rotates_tokens() {
        let store = store().await;
        let linked = store
            .link_provider_account(&link("github", &nanoid::nanoid!(8), &unique_email()))
            .await
            .unwrap();

        let mut connection = linked.connection;
        connection.rotate_tokens("at-2".to_string(), None, None);
        let updated = store.update_connection(&connection).await.unwrap();

        assert_eq!(updated.access_token, "at-2");
        assert_eq!(updated.refresh_token.as_deref(), Some("rt"));
        assert!(updated.expires_at.is_none());
    }
}
