//! Per-provider `OAuth2` configuration section
//!
//! Each entry under `oauth.providers` decodes into one `ProviderConfig`.
//! The entry name doubles as the provider kind unless `kind` is given.

use serde::{Deserialize, Serialize};

/// Configuration for one provider instance
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Adapter kind ("google", "github"); defaults to the instance name
    pub kind: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    /// Default redirect URI registered with the provider
    pub redirect_url: String,
    /// Requested scopes; empty means the adapter's defaults
    pub scopes: Vec<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub userinfo_url: Option<String>,
    /// GitHub only: endpoint listing the user's addresses
    pub emails_url: Option<String>,
}

impl ProviderConfig {
    /// Adapter kind for the instance registered as `instance_name`
    #[must_use]
    pub fn kind_or<'a>(&'a self, instance_name: &'a str) -> &'a str {
        self.kind.as_deref().unwrap_or(instance_name)
    }

    /// Configured scopes, or `defaults` when none were set
    #[must_use]
    pub fn scopes_or(&self, defaults: &[&str]) -> Vec<String> {
        if self.scopes.is_empty() {
            defaults.iter().map(ToString::to_string).collect()
        } else {
            self.scopes.clone()
        }
    }

    /// Collect every problem with this section
    #[must_use]
    pub fn validate(&self, instance_name: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.client_id.trim().is_empty() {
            errors.push(format!("oauth.providers.{instance_name}.client_id is required"));
        }
        if self.client_secret.trim().is_empty() {
            errors.push(format!("oauth.providers.{instance_name}.client_secret is required"));
        }
        if self.redirect_url.trim().is_empty() {
            errors.push(format!("oauth.providers.{instance_name}.redirect_url is required"));
        } else if url::Url::parse(&self.redirect_url).is_err() {
            errors.push(format!(
                "oauth.providers.{instance_name}.redirect_url is not a valid URL: {}",
                self.redirect_url
            ));
        }
        errors
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("emails_url", &self.emails_url)
            .finish()
    }
}
