//! Test helpers and fixtures for idlink tests
//!
//! `StubProvider` stands in for an upstream provider without any network
//! access and counts the calls made to it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::oauth2::{Provider, ProviderRegistry, ProviderToken, ProviderUserInfo};
use crate::{Error, Result};

/// Provider double with scripted responses
pub struct StubProvider {
    kind: String,
    user: Mutex<ProviderUserInfo>,
    expires_in: Option<u64>,
    issue_refresh_token: bool,
    rotate_refresh_token: bool,
    fail_exchange: bool,
    fail_user_info: bool,
    delay: Option<Duration>,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    user_info_calls: AtomicUsize,
}

impl StubProvider {
    /// Stub reporting `stub-user` / `user@example.com`, tokens valid for an hour
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            user: Mutex::new(ProviderUserInfo {
                id: "stub-user".to_string(),
                email: "user@example.com".to_string(),
                name: "Stub User".to_string(),
            }),
            expires_in: Some(3600),
            issue_refresh_token: true,
            rotate_refresh_token: false,
            fail_exchange: false,
            fail_user_info: false,
            delay: None,
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            user_info_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_user(self, id: &str, email: &str, name: &str) -> Self {
        self.set_user(id, email, name);
        self
    }

    pub fn with_expires_in(mut self, expires_in: Option<u64>) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Exchanges return no refresh token
    pub fn without_refresh_token(mut self) -> Self {
        self.issue_refresh_token = false;
        self
    }

    /// Refreshes return a new refresh token instead of echoing the old one
    pub fn rotating_refresh_token(mut self) -> Self {
        self.rotate_refresh_token = true;
        self
    }

    pub fn failing_exchange(mut self) -> Self {
        self.fail_exchange = true;
        self
    }

    pub fn failing_user_info(mut self) -> Self {
        self.fail_user_info = true;
        self
    }

    /// Delay every upstream call, for cancellation and timeout tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Change the claim reported by later `user_info` calls
    pub fn set_user(&self, id: &str, email: &str, name: &str) {
        *self.user.lock() = ProviderUserInfo {
            id: id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
        };
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn user_info_calls(&self) -> usize {
        self.user_info_calls.load(Ordering::SeqCst)
    }

    /// Total upstream calls of any kind
    pub fn total_calls(&self) -> usize {
        self.exchange_calls() + self.refresh_calls() + self.user_info_calls()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn provider_type(&self) -> &str {
        &self.kind
    }

    fn auth_url(&self, redirect_override: Option<&str>, state: &str) -> String {
        let redirect = redirect_override.unwrap_or("https://app.example.com/callback");
        let mut url = url::Url::parse(&format!("https://{}.example.com/authorize", self.kind))
            .expect("stub kind forms a valid host");
        url.query_pairs_mut()
            .append_pair("redirect_uri", redirect)
            .append_pair("state", state);
        url.into()
    }

    async fn exchange_token(&self, code: &str, _redirect_override: Option<&str>) -> Result<ProviderToken> {
        let n = self.exchange_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pause().await;
        if self.fail_exchange {
            return Err(Error::token_exchange(&self.kind, "stub rejects every code"));
        }
        Ok(ProviderToken {
            access_token: format!("{}-at-{code}-{n}", self.kind),
            refresh_token: self.issue_refresh_token.then(|| format!("{}-rt-{n}", self.kind)),
            expires_in: self.expires_in,
            token_type: "Bearer".to_string(),
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderToken> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pause().await;
        if self.fail_exchange {
            return Err(Error::token_exchange(&self.kind, "stub rejects every refresh"));
        }
        let next = if self.rotate_refresh_token {
            format!("{}-rt-rotated-{n}", self.kind)
        } else {
            refresh_token.to_string()
        };
        Ok(ProviderToken {
            access_token: format!("{}-at-refreshed-{n}", self.kind),
            refresh_token: Some(next),
            expires_in: self.expires_in,
            token_type: "Bearer".to_string(),
        })
    }

    async fn user_info(&self, _access_token: &str) -> Result<ProviderUserInfo> {
        self.user_info_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_user_info {
            return Err(Error::invalid_token(&self.kind, "stub rejects every token"));
        }
        Ok(self.user.lock().clone())
    }
}

/// Registry with each stub registered under its kind
pub fn registry_with(providers: &[Arc<StubProvider>]) -> ProviderRegistry {
    let registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider.provider_type().to_string(), Arc::clone(provider) as Arc<dyn Provider>);
    }
    registry
}
