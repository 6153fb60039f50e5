//! GitHub `OAuth2` provider

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client};
use serde::{de::DeserializeOwned, Deserialize};
use url::Url;

use crate::oauth2::client::Endpoints;
use crate::oauth2::{OAuth2Client, Provider, ProviderConfig, ProviderToken, ProviderUserInfo};
use crate::{Error, Result};

const ENDPOINTS: Endpoints = Endpoints {
    auth_url: "https://github.com/login/oauth/authorize",
    token_url: "https://github.com/login/oauth/access_token",
    scopes: &["read:user", "user:email"],
};

const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";

/// GitHub `OAuth2` provider
#[derive(Debug, Clone)]
pub struct GitHubProvider {
    client: OAuth2Client,
    user_url: Url,
    emails_url: Url,
}

#[derive(Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

impl GitHubProvider {
    /// Create a new GitHub provider with configuration
    ///
    /// # Errors
    /// Returns `InvalidInput` if a configured endpoint is not a valid URL.
    pub fn create(config: &ProviderConfig, http: Client) -> Result<Self> {
        let parse = |value: Option<&String>, fallback: &str| {
            let raw = value.map_or(fallback, String::as_str);
            Url::parse(raw).map_err(|e| Error::InvalidInput(format!("Invalid GitHub API URL '{raw}': {e}")))
        };

        Ok(Self {
            client: OAuth2Client::new("github", config, ENDPOINTS, http)?,
            user_url: parse(config.userinfo_url.as_ref(), USER_URL)?,
            emails_url: parse(config.emails_url.as_ref(), EMAILS_URL)?,
        })
    }

    async fn api_get<T: DeserializeOwned>(&self, url: &Url, access_token: &str) -> Result<T> {
        let resp = self
            .client
            .http()
            .get(url.clone())
            .bearer_auth(access_token)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| Error::invalid_token("github", format!("request to {} failed: {e}", url.path())))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::invalid_token(
                "github",
                format!("{} returned status {}", url.path(), status.as_u16()),
            ));
        }

        resp.json()
            .await
            .map_err(|e| Error::invalid_token("github", format!("malformed response from {}: {e}", url.path())))
    }

    /// Primary verified address, else any verified one
    fn pick_email(emails: Vec<GitHubEmail>) -> Option<String> {
        let mut verified = emails.into_iter().filter(|e| e.verified);
        let first = verified.next()?;
        if first.primary {
            return Some(first.email);
        }
        Some(verified.find(|e| e.primary).map_or(first.email, |e| e.email))
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    fn provider_type(&self) -> &str {
        "github"
    }

    fn auth_url(&self, redirect_override: Option<&str>, state: &str) -> String {
        self.client.authorize_url(redirect_override, state, &[])
    }

    async fn exchange_token(&self, code: &str, redirect_override: Option<&str>) -> Result<ProviderToken> {
        self.client.exchange_code(code, redirect_override).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderToken> {
        self.client.refresh(refresh_token).await
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo> {
        let user: GitHubUser = self.api_get(&self.user_url, access_token).await?;

        // The profile email is only set when the user made it public
        let email = match user.email.filter(|e| !e.trim().is_empty()) {
            Some(email) => email,
            None => {
                let emails: Vec<GitHubEmail> = self.api_get(&self.emails_url, access_token).await?;
                Self::pick_email(emails)
                    .ok_or_else(|| Error::invalid_token("github", "account has no verified email address"))?
            }
        };

        Ok(ProviderUserInfo {
            id: user.id.to_string(),
            email,
            name: user.name.filter(|n| !n.is_empty()).unwrap_or(user.login),
        })
    }
}
