//! Identity reconciliation engine
//!
//! Drives the login flow: issue a login URL, then on callback exchange the
//! code, read the provider's identity claim and decide whether to rotate the
//! tokens of a known connection or link the provider account to the local
//! identity owning the claimed email.

use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    models::{AuthIdentity, ProviderConnection},
    oauth2::{Provider, ProviderRegistry, ProviderUserInfo, StateStore},
    repository::{AccountLink, IdentityStore},
    Error, Result,
};

/// Login URL handed to the browser, with the state it embeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    pub url: String,
    pub state: String,
}

/// Result of a successful callback
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub identity: AuthIdentity,
    pub access_token: String,
    /// Lifetime of `access_token` in seconds, as reported by the provider
    pub expires_in: Option<u64>,
    /// Redirect URI bound to the state at login time
    pub redirect_url: Option<String>,
    pub identity_created: bool,
    pub connection_created: bool,
}

/// Result of a stateless token refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: Option<u64>,
}

/// Identity reconciliation engine
#[derive(Clone)]
pub struct ReconciliationEngine {
    registry: ProviderRegistry,
    store: Arc<dyn IdentityStore>,
    states: StateStore,
    flow_timeout: Duration,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("registry", &self.registry)
            .field("flow_timeout", &self.flow_timeout)
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    /// Default bound on one flow, upstream calls and store writes included
    pub const DEFAULT_FLOW_TIMEOUT_SECS: u64 = 30;

    #[must_use]
    pub fn new(registry: ProviderRegistry, store: Arc<dyn IdentityStore>, states: StateStore) -> Self {
        Self {
            registry,
            store,
            states,
            flow_timeout: Duration::from_secs(Self::DEFAULT_FLOW_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_flow_timeout(mut self, flow_timeout: Duration) -> Self {
        self.flow_timeout = flow_timeout;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Registered provider names
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        self.registry.list_names()
    }

    /// Build the login URL for `provider_name` and issue the state it carries
    ///
    /// # Errors
    /// `InvalidProvider` for an unknown provider, `InvalidRedirectUrl` for an
    /// unsafe redirect override.
    pub async fn login_url(&self, provider_name: &str, redirect_override: Option<&str>) -> Result<LoginRedirect> {
        let provider = self.registry.resolve(provider_name)?;
        if let Some(url) = redirect_override {
            validate_redirect_url(url)?;
        }

        let state = self
            .states
            .issue(provider_name, redirect_override.map(ToString::to_string))
            .await;
        let url = provider.auth_url(redirect_override, &state);

        debug!(provider = %provider_name, "Issued OAuth2 login URL");
        Ok(LoginRedirect { url, state })
    }

    /// Complete a login: verify the state, exchange the code and reconcile the
    /// provider account with the local identity graph.
    ///
    /// # Errors
    /// `InvalidProvider`, `MissingCode`, `MissingState`, `StateMismatch`,
    /// `TokenExchangeFailed`, `InvalidToken`, `NotFound` (connection whose
    /// identity is gone), `UserCreationFailed`, `Cancelled` or `Timeout`.
    #[tracing::instrument(name = "oauth_callback", skip_all, fields(provider = %provider_name))]
    pub async fn handle_callback(
        &self,
        provider_name: &str,
        code: Option<&str>,
        state: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CallbackOutcome> {
        // Resolve before anything else so unknown providers never reach the network
        let provider = self.registry.resolve(provider_name)?;
        let code = code.filter(|c| !c.is_empty()).ok_or(Error::MissingCode)?;
        let state = state.filter(|s| !s.is_empty()).ok_or(Error::MissingState)?;

        self.guarded(cancel, self.callback_flow(provider_name, provider.as_ref(), code, state))
            .await
    }

    async fn callback_flow(
        &self,
        provider_name: &str,
        provider: &dyn Provider,
        code: &str,
        state: &str,
    ) -> Result<CallbackOutcome> {
        let issued = self.states.consume(provider_name, state).await?;
        let redirect_url = issued.redirect_url;

        let token = provider.exchange_token(code, redirect_url.as_deref()).await?;
        let expires_at = expiry_from(Utc::now(), token.expires_in);

        let claim = provider.user_info(&token.access_token).await?;
        let email = claim.normalized_email();
        if email.is_empty() {
            return Err(Error::invalid_token(provider_name, "claim carries no email address"));
        }

        let existing = match self
            .store
            .find_connection_by_provider_key(provider_name, &claim.id)
            .await
        {
            Ok(connection) => Some(connection),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e.context("find provider connection")),
        };

        if let Some(mut connection) = existing {
            info!(
                provider = %provider_name,
                identity_id = %connection.identity_id,
                "Known provider account, rotating tokens"
            );
            connection.rotate_tokens(token.access_token.clone(), token.refresh_token.clone(), expires_at);
            self.store
                .update_connection(&connection)
                .await
                .map_err(|e| e.context("update provider connection"))?;
            let identity = self
                .store
                .find_auth_by_id(&connection.identity_id)
                .await
                .map_err(|e| e.context("load owning identity"))?;

            return Ok(CallbackOutcome {
                identity,
                access_token: token.access_token,
                expires_in: token.expires_in,
                redirect_url,
                identity_created: false,
                connection_created: false,
            });
        }

        let link = account_link(provider_name, claim, email, &token.access_token, token.refresh_token, expires_at);
        let linked = self
            .store
            .link_provider_account(&link)
            .await
            .map_err(|e| match e {
                Error::Cancelled | Error::Timeout(_) => e,
                other => Error::UserCreationFailed(other.to_string()),
            })?;

        info!(
            provider = %provider_name,
            identity_id = %linked.identity.id,
            identity_created = linked.identity_created,
            connection_created = linked.connection_created,
            "Linked provider account"
        );

        Ok(CallbackOutcome {
            identity: linked.identity,
            access_token: token.access_token,
            expires_in: token.expires_in,
            redirect_url,
            identity_created: linked.identity_created,
            connection_created: linked.connection_created,
        })
    }

    /// Trade a refresh token for a new access token. No local state changes.
    ///
    /// # Errors
    /// `InvalidProvider`, `InvalidInput` for an empty refresh token,
    /// `TokenExchangeFailed`, `Cancelled` or `Timeout`.
    #[tracing::instrument(name = "oauth_refresh", skip_all, fields(provider = %provider_name))]
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        provider_name: &str,
        cancel: &CancellationToken,
    ) -> Result<RefreshedToken> {
        let provider = self.registry.resolve(provider_name)?;
        if refresh_token.trim().is_empty() {
            return Err(Error::InvalidInput("refresh_token is required".to_string()));
        }

        let token = self
            .guarded(cancel, provider.refresh_token(refresh_token))
            .await?;
        debug!(provider = %provider_name, "Refreshed access token");

        Ok(RefreshedToken {
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }

    /// Refresh the stored tokens of one connection and persist the result
    ///
    /// # Errors
    /// `InvalidProvider`, `NotFound` for an unknown connection,
    /// `TokenExchangeFailed` (including when no refresh token is stored),
    /// `Cancelled` or `Timeout`.
    #[tracing::instrument(name = "oauth_refresh_connection", skip_all, fields(provider = %provider_name))]
    pub async fn refresh_connection(
        &self,
        provider_name: &str,
        provider_user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderConnection> {
        let provider = self.registry.resolve(provider_name)?;

        self.guarded(cancel, async {
            let mut connection = self
                .store
                .find_connection_by_provider_key(provider_name, provider_user_id)
                .await?;
            let stored = connection
                .refresh_token
                .clone()
                .ok_or_else(|| Error::token_exchange(provider_name, "no refresh token stored for connection"))?;

            let token = provider.refresh_token(&stored).await?;
            let expires_at = expiry_from(Utc::now(), token.expires_in);
            connection.rotate_tokens(token.access_token, token.refresh_token, expires_at);

            let updated = self
                .store
                .update_connection(&connection)
                .await
                .map_err(|e| e.context("update provider connection"))?;
            info!(provider = %provider_name, identity_id = %updated.identity_id, "Refreshed stored connection");
            Ok(updated)
        })
        .await
    }

    /// Fetch the provider's identity claim for an access token
    ///
    /// # Errors
    /// `InvalidProvider`, `InvalidToken`, `Cancelled` or `Timeout`.
    pub async fn user_info(
        &self,
        provider_name: &str,
        access_token: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderUserInfo> {
        let provider = self.registry.resolve(provider_name)?;
        self.guarded(cancel, provider.user_info(access_token)).await
    }

    /// Run `flow` until it completes, `cancel` fires or the flow deadline passes
    async fn guarded<T, F>(&self, cancel: &CancellationToken, flow: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!("OAuth2 flow cancelled");
                Err(Error::Cancelled)
            }
            res = tokio::time::timeout(self.flow_timeout, flow) => {
                res.unwrap_or_else(|_| Err(Error::Timeout(self.flow_timeout)))
            }
        }
    }
}

fn account_link(
    provider_name: &str,
    claim: ProviderUserInfo,
    email: String,
    access_token: &str,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> AccountLink {
    AccountLink {
        provider_name: provider_name.to_string(),
        provider_user_id: claim.id,
        email,
        name: claim.name,
        access_token: access_token.to_string(),
        refresh_token,
        expires_at,
    }
}

/// Absolute expiry for a token issued at `now`; `None` when the provider gave
/// no lifetime or one too large to represent.
fn expiry_from(now: DateTime<Utc>, expires_in: Option<u64>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(expires_in?).ok()?;
    now.checked_add_signed(TimeDelta::try_seconds(secs)?)
}

/// Reject redirect overrides usable for open redirects
fn validate_redirect_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(Error::InvalidRedirectUrl("redirect URL cannot be empty".to_string()));
    }
    if url.starts_with("//") {
        return Err(Error::InvalidRedirectUrl(
            "protocol-relative URLs are not allowed".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|_| Error::InvalidRedirectUrl(format!("not an absolute URL: {url}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidRedirectUrl(format!(
            "scheme {} is not allowed, use http or https",
            parsed.scheme()
        )));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(Error::InvalidRedirectUrl(
            "URLs with embedded credentials are not allowed".to_string(),
        ));
    }
    Ok(())
}
