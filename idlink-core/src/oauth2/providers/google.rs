//! Google `OAuth2` provider

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::oauth2::client::Endpoints;
use crate::oauth2::{OAuth2Client, Provider, ProviderConfig, ProviderToken, ProviderUserInfo};
use crate::{Error, Result};

const ENDPOINTS: Endpoints = Endpoints {
    auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    scopes: &["email", "profile"],
};

const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Google `OAuth2` provider
#[derive(Debug, Clone)]
pub struct GoogleProvider {
    client: OAuth2Client,
    userinfo_url: Url,
}

impl GoogleProvider {
    /// Create a new Google provider with configuration
    ///
    /// # Errors
    /// Returns `InvalidInput` if a configured endpoint is not a valid URL.
    pub fn create(config: &ProviderConfig, http: Client) -> Result<Self> {
        let userinfo = config.userinfo_url.as_deref().unwrap_or(USERINFO_URL);
        let userinfo_url = Url::parse(userinfo)
            .map_err(|e| Error::InvalidInput(format!("Invalid Google userinfo URL '{userinfo}': {e}")))?;

        Ok(Self {
            client: OAuth2Client::new("google", config, ENDPOINTS, http)?,
            userinfo_url,
        })
    }
}

#[derive(Deserialize)]
struct GoogleUser {
    id: String,
    email: Option<String>,
    verified_email: Option<bool>,
    #[serde(default)]
    name: String,
}

#[async_trait]
impl Provider for GoogleProvider {
    fn provider_type(&self) -> &str {
        "google"
    }

    fn auth_url(&self, redirect_override: Option<&str>, state: &str) -> String {
        // offline access so that Google issues a refresh token
        self.client
            .authorize_url(redirect_override, state, &[("access_type", "offline")])
    }

    async fn exchange_token(&self, code: &str, redirect_override: Option<&str>) -> Result<ProviderToken> {
        self.client.exchange_code(code, redirect_override).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderToken> {
        self.client.refresh(refresh_token).await
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo> {
        let resp = self
            .client
            .http()
            .get(self.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::invalid_token("google", format!("user info request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::invalid_token(
                "google",
                format!("user info endpoint returned status {}", status.as_u16()),
            ));
        }

        let user: GoogleUser = resp
            .json()
            .await
            .map_err(|e| Error::invalid_token("google", format!("malformed user info: {e}")))?;

        let email = user
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| Error::invalid_token("google", "account has no email address"))?;
        // The email links accounts across providers, so it must be verified
        if user.verified_email == Some(false) {
            return Err(Error::invalid_token("google", "account email is not verified"));
        }

        Ok(ProviderUserInfo {
            id: user.id,
            email,
            name: user.name,
        })
    }
}
