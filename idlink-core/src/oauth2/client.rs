//! Token-endpoint plumbing shared by the provider adapters
//!
//! Wraps an `oauth2` [`BasicClient`] per provider instance: authorization URLs,
//! the code grant and the refresh grant. Adapters only add their user-info
//! calls on top.

use std::borrow::Cow;

use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    HttpRequest, HttpResponse, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use reqwest::Client;
use tracing::{debug, warn};

use super::{ProviderConfig, ProviderToken};
use crate::{Error, Result};

/// Built-in endpoints of one provider kind
#[derive(Debug, Clone, Copy)]
pub struct Endpoints {
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static [&'static str],
}

type ConfiguredClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Configured `OAuth2` client for one provider instance
#[derive(Clone)]
pub struct OAuth2Client {
    provider: String,
    client: ConfiguredClient,
    scopes: Vec<String>,
    http: Client,
}

impl OAuth2Client {
    /// Create a client from a provider config, falling back to `defaults`
    /// for endpoints and scopes the config leaves unset.
    ///
    /// # Errors
    /// Returns `InvalidInput` if an endpoint or the redirect URL is not a valid URL.
    pub fn new(provider: &str, config: &ProviderConfig, defaults: Endpoints, http: Client) -> Result<Self> {
        let invalid = |what: &str, raw: &str, e: oauth2::url::ParseError| {
            Error::InvalidInput(format!("Invalid {provider} {what} '{raw}': {e}"))
        };

        let auth = config.auth_url.as_deref().unwrap_or(defaults.auth_url);
        let auth_url = AuthUrl::new(auth.to_string()).map_err(|e| invalid("auth URL", auth, e))?;
        let token = config.token_url.as_deref().unwrap_or(defaults.token_url);
        let token_url = TokenUrl::new(token.to_string()).map_err(|e| invalid("token URL", token, e))?;
        let redirect_url = RedirectUrl::new(config.redirect_url.clone())
            .map_err(|e| invalid("redirect URL", &config.redirect_url, e))?;

        // Credentials go in the form body; GitHub does not take HTTP Basic auth
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url)
            .set_auth_type(AuthType::RequestBody);

        Ok(Self {
            provider: provider.to_string(),
            client,
            scopes: config.scopes_or(defaults.scopes),
            http,
        })
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[must_use]
    pub const fn http(&self) -> &Client {
        &self.http
    }

    /// Authorization URL with client id, redirect URI, scopes and state,
    /// plus any provider-specific `extra` parameters.
    ///
    /// An override that is not an absolute URL is ignored in favor of the
    /// configured redirect; callers validate overrides beforehand.
    #[must_use]
    pub fn authorize_url(&self, redirect_override: Option<&str>, state: &str, extra: &[(&str, &str)]) -> String {
        let mut request = self
            .client
            .authorize_url(|| CsrfToken::new(state.to_string()))
            .add_scopes(self.scopes.iter().cloned().map(Scope::new));
        for (key, value) in extra {
            request = request.add_extra_param(*key, *value);
        }
        match redirect_override.map(redirect_url).transpose() {
            Ok(Some(redirect)) => request = request.set_redirect_uri(Cow::Owned(redirect)),
            Ok(None) => {}
            Err(e) => warn!(provider = %self.provider, "Ignoring redirect override: {}", e),
        }

        let (url, _csrf) = request.url();
        url.into()
    }

    /// Authorization-code grant
    pub async fn exchange_code(&self, code: &str, redirect_override: Option<&str>) -> Result<ProviderToken> {
        let mut request = self.client.exchange_code(AuthorizationCode::new(code.to_string()));
        if let Some(redirect) = redirect_override.map(redirect_url).transpose()? {
            request = request.set_redirect_uri(Cow::Owned(redirect));
        }

        let http = self.http.clone();
        let response = request
            .request_async(&move |req: HttpRequest| execute(http.clone(), req))
            .await
            .map_err(|e| self.token_error(e))?;

        let token = Self::convert(&response);
        debug!(provider = %self.provider, expires_in = ?token.expires_in, "Exchanged authorization code");
        Ok(token)
    }

    /// Refresh-token grant, keeping `refresh_token` when the provider
    /// does not rotate it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<ProviderToken> {
        let current = RefreshToken::new(refresh_token.to_string());
        let http = self.http.clone();
        let response = self
            .client
            .exchange_refresh_token(&current)
            .request_async(&move |req: HttpRequest| execute(http.clone(), req))
            .await
            .map_err(|e| self.token_error(e))?;

        let mut token = Self::convert(&response);
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        debug!(provider = %self.provider, "Refreshed access token");
        Ok(token)
    }

    fn convert(response: &BasicTokenResponse) -> ProviderToken {
        ProviderToken {
            access_token: response.access_token().secret().clone(),
            refresh_token: response
                .refresh_token()
                .map(|t| t.secret().clone())
                .filter(|t| !t.is_empty()),
            expires_in: response.expires_in().map(|d| d.as_secs()),
            token_type: response.token_type().as_ref().to_string(),
        }
    }

    fn token_error(&self, err: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> Error {
        let reason = match err {
            RequestTokenError::ServerResponse(resp) => match resp.error_description() {
                Some(desc) => format!("{}: {desc}", resp.error()),
                None => resp.error().to_string(),
            },
            RequestTokenError::Request(e) => format!("request failed: {e}"),
            RequestTokenError::Parse(e, _) => format!("malformed token response: {e}"),
            RequestTokenError::Other(msg) => msg,
        };
        Error::token_exchange(&self.provider, reason)
    }
}

fn redirect_url(raw: &str) -> Result<RedirectUrl> {
    RedirectUrl::new(raw.to_string()).map_err(|e| Error::InvalidRedirectUrl(format!("{raw}: {e}")))
}

/// Send an `oauth2` request through the shared reqwest client
async fn execute(http: Client, request: HttpRequest) -> std::result::Result<HttpResponse, reqwest::Error> {
    let response = http.execute(request.try_into()?).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    let mut out = HttpResponse::new(body.to_vec());
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    Ok(out)
}

impl std::fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Client")
            .field("provider", &self.provider)
            .field("client_id", &self.client.client_id().as_str())
            .field("auth_url", &self.client.auth_uri().as_str())
            .field("token_url", &self.client.token_uri().as_str())
            .finish_non_exhaustive()
    }
}
