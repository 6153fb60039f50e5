//! CSRF state store for the login flow
//!
//! Every login URL carries a fresh state token. The callback must present it
//! back for the same provider before its TTL runs out, and only once.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::{Error, Result};

/// What a state token was issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedState {
    pub provider: String,
    /// Redirect URI the login URL was built with, if not the configured one
    pub redirect_url: Option<String>,
    pub issued_at: Instant,
}

/// Single-use state tokens with a TTL
#[derive(Clone)]
pub struct StateStore {
    states: Arc<moka::future::Cache<String, IssuedState>>,
    ttl: Duration,
}

impl StateStore {
    /// Default state lifetime (10 minutes)
    pub const DEFAULT_TTL_SECS: u64 = 600;
    /// Default maximum number of outstanding states
    pub const DEFAULT_CAPACITY: u64 = 100_000;

    #[must_use]
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            states: Arc::new(
                moka::future::CacheBuilder::new(capacity)
                    .time_to_live(ttl)
                    .build(),
            ),
            ttl,
        }
    }

    /// Issue a new state token for `provider`
    pub async fn issue(&self, provider: &str, redirect_url: Option<String>) -> String {
        let state = nanoid::nanoid!(32);
        self.states
            .insert(
                state.clone(),
                IssuedState {
                    provider: provider.to_string(),
                    redirect_url,
                    issued_at: Instant::now(),
                },
            )
            .await;
        state
    }

    /// Consume a state token presented by a callback for `provider`
    ///
    /// The token is removed whether or not it matches, so it can never be
    /// replayed.
    ///
    /// # Errors
    /// Returns `StateMismatch` if the token is unknown, expired, already used,
    /// or was issued for another provider.
    pub async fn consume(&self, provider: &str, state: &str) -> Result<IssuedState> {
        let issued = self.states.remove(state).await.ok_or(Error::StateMismatch)?;

        if issued.issued_at.elapsed() > self.ttl {
            tracing::debug!(provider = %provider, "Rejected expired OAuth2 state");
            return Err(Error::StateMismatch);
        }
        if issued.provider != provider {
            tracing::warn!(
                expected = %issued.provider,
                presented = %provider,
                "OAuth2 state presented to the wrong provider"
            );
            return Err(Error::StateMismatch);
        }
        Ok(issued)
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(Self::DEFAULT_TTL_SECS), Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}
