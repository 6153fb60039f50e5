//! Service initialization and dependency injection

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};

use crate::{
    oauth2::{providers::create_provider, ProviderRegistry, StateStore},
    repository::{IdentityStore, MemoryIdentityStore, PgIdentityStore},
    service::ReconciliationEngine,
    Config,
};

/// User agent sent to providers; GitHub rejects API calls without one
const USER_AGENT: &str = concat!("idlink/", env!("CARGO_PKG_VERSION"));

/// Container for all initialized services
#[derive(Clone, Debug)]
pub struct Services {
    /// Login flow and account reconciliation
    pub engine: Arc<ReconciliationEngine>,
    /// Configured provider adapters, shared with the engine
    pub registry: ProviderRegistry,
}

/// Initialize all core services
///
/// Without a pool the identity store is kept in memory, which loses every
/// account on restart.
pub fn init_services(pool: Option<PgPool>, config: &Config) -> Result<Services, anyhow::Error> {
    info!("Initializing services...");

    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(config.oauth.http_timeout_seconds))
        .build()?;

    let registry = init_provider_registry(config, &http);
    if registry.is_empty() {
        warn!("No OAuth2 providers configured, every login will fail with InvalidProvider");
    }

    let store: Arc<dyn IdentityStore> = if let Some(pool) = pool {
        Arc::new(PgIdentityStore::new(pool))
    } else {
        warn!("No database pool, using the in-memory identity store");
        Arc::new(MemoryIdentityStore::new())
    };

    let states = StateStore::new(
        Duration::from_secs(config.oauth.state_ttl_seconds),
        config.oauth.state_capacity,
    );

    let engine = ReconciliationEngine::new(registry.clone(), store, states)
        .with_flow_timeout(Duration::from_secs(config.oauth.flow_timeout_seconds));

    info!(providers = ?registry.list_names(), "Services initialized");

    Ok(Services {
        engine: Arc::new(engine),
        registry,
    })
}

/// Build one adapter per configured provider instance
///
/// Instances that fail to build are skipped with a warning.
pub fn init_provider_registry(config: &Config, http: &reqwest::Client) -> ProviderRegistry {
    let registry = ProviderRegistry::new();

    for (instance_name, provider_config) in &config.oauth.providers {
        let kind = provider_config.kind_or(instance_name);
        match create_provider(kind, provider_config, http.clone()) {
            Ok(provider) => registry.register(instance_name.clone(), provider),
            Err(e) => warn!("Failed to create OAuth2 provider {}: {}", instance_name, e),
        }
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth2::ProviderConfig;

    fn provider(kind: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            kind: kind.map(ToString::to_string),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "https://app.example.com/cb".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = Config::default();
        config.oauth.providers.insert("google".to_string(), provider(None));
        config.oauth.providers.insert("corp".to_string(), provider(Some("github")));
        config.oauth.providers.insert("broken".to_string(), provider(Some("myspace")));

        let registry = init_provider_registry(&config, &reqwest::Client::new());
        assert_eq!(registry.list_names(), vec!["corp", "google"]);
        assert_eq!(registry.resolve("corp").unwrap().provider_type(), "github");
    }

    #[tokio::test]
    async fn test_init_services_without_pool() {
        let mut config = Config::default();
        config.oauth.providers.insert("github".to_string(), provider(None));

        let services = init_services(None, &config).unwrap();
        assert_eq!(services.engine.providers(), vec!["github"]);
        assert!(services.engine.login_url("github", None).await.is_ok());
    }
}
