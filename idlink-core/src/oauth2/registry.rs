//! Provider registry
//!
//! Maps provider names to adapters. Lookups take a read lock, registration
//! takes the write lock, so callbacks never block each other.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::Provider;
use crate::{Error, Result};

/// Shared name -> adapter map
///
/// Cloning is cheap and every clone sees the same entries.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<String, Arc<dyn Provider>>>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under `name`, replacing any previous one
    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        let name = name.into();
        tracing::info!(provider = %name, kind = %provider.provider_type(), "Registered OAuth2 provider");
        self.providers.write().insert(name, provider);
    }

    /// Look up an adapter by name
    ///
    /// # Errors
    /// Returns `InvalidProvider` if no adapter is registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InvalidProvider(name.to_string()))
    }

    /// Registered provider names, sorted
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list_names())
            .finish()
    }
}
