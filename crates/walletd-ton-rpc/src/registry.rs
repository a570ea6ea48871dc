//! Provider registry: a stateless view over config resolved
//! against environment secrets. Owns no locks of its own beyond the
//! whole-map swap needed for `updateConfig` reloads.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{ApiVersion, ConfigDocument, ConfigError, Network, ProviderConfig, ProviderType};
use crate::logging::RpcLogger;

/// Runtime view of a provider, derived from [`ProviderConfig`] plus the
/// environment. Treated as immutable after construction — reload
/// replaces the whole map rather than mutating individual entries.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProvider {
    pub id: String,
    pub display_name: String,
    pub provider_type: ProviderType,
    pub network: Network,
    pub endpoints: HashMap<ApiVersion, String>,
    pub api_key: Option<String>,
    pub rps: u32,
    pub priority: u32,
    pub enabled: bool,
    pub is_dynamic: bool,
    pub browser_compatible: bool,
}

impl ResolvedProvider {
    /// Whether any of v2/v3/v4 is free of an unresolved `{key}` token, or
    /// this provider resolves its endpoint dynamically. A provider that
    /// fails this still exists in the registry — a missing env
    /// value is a warn-and-leave-placeholder condition that only fails
    /// validation later, at probe time.
    pub fn has_usable_static_endpoint(&self) -> bool {
        self.is_dynamic
            || self
                .endpoints
                .values()
                .any(|url| !url.contains("{key}"))
    }

    pub fn endpoint(&self, version: ApiVersion) -> Option<&str> {
        self.endpoints.get(&version).map(String::as_str)
    }
}

fn resolve_one(config: &ProviderConfig, logger: &dyn RpcLogger) -> ResolvedProvider {
    let key_value = config
        .key_env_name
        .as_ref()
        .and_then(|name| std::env::var(name).ok());

    if config.key_env_name.is_some() && key_value.is_none() {
        logger.warn(&format!(
            "provider '{}': env var '{}' is not set, endpoint templates still contain {{key}}",
            config.id,
            config.key_env_name.as_deref().unwrap_or("")
        ));
    }

    let endpoints = config
        .endpoints
        .iter()
        .map(|(version, template)| {
            let resolved = match &key_value {
                Some(value) => template.replace("{key}", value),
                None => template.clone(),
            };
            (*version, resolved)
        })
        .collect();

    let api_key = config
        .api_key_env_name
        .as_ref()
        .and_then(|name| std::env::var(name).ok());

    if config.api_key_env_name.is_some() && api_key.is_none() {
        logger.warn(&format!(
            "provider '{}': api key env var '{}' is not set",
            config.id,
            config.api_key_env_name.as_deref().unwrap_or("")
        ));
    }

    ResolvedProvider {
        id: config.id.clone(),
        display_name: config.display_name.clone(),
        provider_type: config.provider_type,
        network: config.network,
        endpoints,
        api_key,
        rps: config.rps,
        priority: config.priority,
        enabled: config.enabled,
        is_dynamic: config.is_dynamic,
        browser_compatible: config.browser_compatible,
    }
}

/// Registry of resolved providers. Reload swaps the whole internal map at
/// once: readers holding a previous `Arc` snapshot keep seeing a
/// consistent view even while a reload is in progress.
pub struct ProviderRegistry {
    providers: tokio::sync::RwLock<Arc<HashMap<String, ResolvedProvider>>>,
}

impl ProviderRegistry {
    pub fn new(document: &ConfigDocument, logger: &dyn RpcLogger) -> Self {
        let resolved = Self::resolve_all(document, logger);
        ProviderRegistry {
            providers: tokio::sync::RwLock::new(Arc::new(resolved)),
        }
    }

    fn resolve_all(
        document: &ConfigDocument,
        logger: &dyn RpcLogger,
    ) -> HashMap<String, ResolvedProvider> {
        document
            .providers
            .iter()
            .map(|(id, config)| (id.clone(), resolve_one(config, logger)))
            .collect()
    }

    /// Atomically replace the registry's contents with a freshly resolved
    /// config document.
    pub async fn reload(&self, document: &ConfigDocument, logger: &dyn RpcLogger) {
        let resolved = Self::resolve_all(document, logger);
        let mut guard = self.providers.write().await;
        *guard = Arc::new(resolved);
    }

    /// Snapshot of the current provider map; cheap to clone (`Arc`).
    pub async fn snapshot(&self) -> Arc<HashMap<String, ResolvedProvider>> {
        self.providers.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<ResolvedProvider> {
        self.providers.read().await.get(id).cloned()
    }

    pub async fn for_network(&self, network: Network) -> Vec<ResolvedProvider> {
        self.providers
            .read()
            .await
            .values()
            .filter(|p| p.network == network && p.enabled)
            .cloned()
            .collect()
    }

    /// Opt-in check an embedder can run after `reload` (e.g. on a deploy
    /// health check) to catch env vars that were never set, rather than
    /// waiting to discover it from failed probes. Not run automatically by
    /// `Manager::init`/`update_config` — a missing env value is a valid,
    /// non-fatal state for providers that are disabled or not yet in use.
    pub async fn validate_resolved(&self) -> Result<(), ConfigError> {
        for provider in self.providers.read().await.values() {
            if provider.is_dynamic {
                continue;
            }
            for (version, endpoint) in &provider.endpoints {
                if endpoint.contains("{key}") {
                    return Err(ConfigError::UnresolvedPlaceholder {
                        provider: provider.id.clone(),
                        version: format!("{version:?}"),
                    });
                }
            }
        }
        Ok(())
    }
}
