//! `OAuth2` provider implementations
//!
//! Each provider is a stateless adapter over one upstream API shape.
//! `create_provider()` picks the adapter for a config section by kind.

pub mod github;
pub mod google;

pub use github::GitHubProvider;
pub use google::GoogleProvider;

use reqwest::Client;
use std::sync::Arc;

use super::{Provider, ProviderConfig};
use crate::{Error, Result};

/// Adapter kinds `create_provider()` knows how to build
pub const SUPPORTED_KINDS: &[&str] = &["google", "github"];

/// Create a provider adapter of the given kind
///
/// # Errors
/// Returns `InvalidInput` for an unknown kind or an invalid endpoint URL.
pub fn create_provider(kind: &str, config: &ProviderConfig, http: Client) -> Result<Arc<dyn Provider>> {
    match kind {
        "google" => Ok(Arc::new(GoogleProvider::create(config, http)?)),
        "github" => Ok(Arc::new(GitHubProvider::create(config, http)?)),
        other => Err(Error::InvalidInput(format!("Unknown provider kind: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "https://app.example.com/cb".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_known_kinds() {
        for kind in SUPPORTED_KINDS {
            let provider = create_provider(kind, &config(), Client::new()).unwrap();
            assert_eq!(provider.provider_type(), *kind);
        }
    }

    #[test]
    fn test_create_unknown_kind() {
        let err = create_provider("facebook", &config(), Client::new()).err().unwrap();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
