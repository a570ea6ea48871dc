//! Manager: thin facade composing the registry, health checker,
//! rate limiters, and selector. Owns no selection/health logic itself —
//! it only wires the four components together and exposes a small public
//! surface plus a subscribable state view.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};

pub use crate::error::ManagerError;

use crate::config::{fallback_endpoint, ConfigDocument, Network};
use crate::error::{classify, ErrorClass};
use crate::families::{HttpOrbsDiscovery, OrbsDiscovery};
use crate::health::{HealthChecker, HealthCheckerConfig, HealthResult, HealthStatus};
use crate::logging::{RpcLogger, TracingLogger};
use crate::rate_limiter::{RateLimiter, RateLimiterSnapshot};
use crate::registry::{ProviderRegistry, ResolvedProvider};
use crate::selector::{Selector, SelectorConfig};

/// Health and rate-limit state for one provider, as broadcast to
/// subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    pub health: HealthResult,
    pub rate_limit: RateLimiterSnapshot,
}

/// Full state snapshot broadcast after init, probes, marks, and override
/// changes.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub network: Network,
    pub initialized: bool,
    pub is_testing: bool,
    pub providers: HashMap<String, ProviderSnapshot>,
    pub best_provider_id: Option<String>,
    pub selected_provider_id: Option<String>,
    pub auto_select: bool,
    pub custom_endpoint: Option<String>,
}

static SINGLETON: OnceLock<Arc<Manager>> = OnceLock::new();

/// Composes the registry, health checker, rate limiters, and selector for
/// one network. One instance per network; construct one per tenant in
/// multi-network contexts rather than reusing a single instance.
pub struct Manager {
    network: Network,
    logger: Arc<dyn RpcLogger>,
    registry: ProviderRegistry,
    health: HealthChecker,
    selector: Selector,
    rate_limiters: DashMap<String, Arc<RateLimiter>>,
    http: reqwest::Client,
    orbs_discovery: Arc<dyn OrbsDiscovery>,
    active_provider: RwLock<Option<String>>,
    subscribers: broadcast::Sender<ManagerSnapshot>,
    background_probe: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Manager {
    /// Load and merge config, construct the four components, pre-size a
    /// rate limiter for every resolved provider, and optionally run a
    /// full probe sweep. Fatal config errors are rejected here; there is
    /// no partially-initialized `Manager` value to hold onto afterwards.
    pub async fn init(
        network: Network,
        document: ConfigDocument,
        probe_on_start: bool,
    ) -> Result<Arc<Self>, ManagerError> {
        Self::init_with(network, document, probe_on_start, Arc::new(TracingLogger), None).await
    }

    /// Same as [`Manager::init`] but with an injected logger and/or Orbs
    /// discovery client, for embedders that want either swapped (tests,
    /// custom sinks).
    pub async fn init_with(
        network: Network,
        document: ConfigDocument,
        probe_on_start: bool,
        logger: Arc<dyn RpcLogger>,
        orbs_discovery: Option<Arc<dyn OrbsDiscovery>>,
    ) -> Result<Arc<Self>, ManagerError> {
        document.validate()?;

        let registry = ProviderRegistry::new(&document, logger.as_ref());
        let health = HealthChecker::new(HealthCheckerConfig::default(), logger.clone());
        let selector = Selector::new(SelectorConfig::default());
        selector.set_defaults(document.defaults.clone()).await;

        let rate_limiters = DashMap::new();
        for provider in registry.for_network(network).await {
            rate_limiters.insert(
                provider.id.clone(),
                Arc::new(RateLimiter::from_rps(provider.rps)),
            );
        }

        let http = reqwest::Client::new();
        let orbs_discovery =
            orbs_discovery.unwrap_or_else(|| Arc::new(HttpOrbsDiscovery::new(http.clone())));
        let (subscribers, _rx) = broadcast::channel(32);

        let manager = Arc::new(Manager {
            network,
            logger,
            registry,
            health,
            selector,
            rate_limiters,
            http,
            orbs_discovery,
            active_provider: RwLock::new(None),
            subscribers,
            background_probe: Mutex::new(None),
        });

        if probe_on_start {
            manager.probe_all().await;
        }
        manager.emit_snapshot().await;

        Ok(manager)
    }

    /// Install this instance as the process-wide singleton, kept as a
    /// convenience for callers that want one global manager. A later call
    /// is a no-op if one is already installed.
    pub fn install_singleton(manager: Arc<Manager>) {
        let _ = SINGLETON.set(manager);
    }

    pub fn singleton() -> Result<Arc<Manager>, ManagerError> {
        SINGLETON.get().cloned().ok_or(ManagerError::NotInitialized)
    }

    /// Re-resolve against a new config document and re-emit state.
    pub async fn update_config(&self, document: ConfigDocument) -> Result<(), ManagerError> {
        document.validate()?;
        self.registry.reload(&document, self.logger.as_ref()).await;
        self.selector.set_defaults(document.defaults.clone()).await;
        for provider in self.registry.for_network(self.network).await {
            self.rate_limiters
                .entry(provider.id.clone())
                .or_insert_with(|| Arc::new(RateLimiter::from_rps(provider.rps)));
        }
        self.emit_snapshot().await;
        Ok(())
    }

    /// Selector → provider, handling the custom override. Returns a
    /// concrete URL; falls back to the hard-coded per-network public
    /// endpoint (with a warning) if nothing is selectable. No rate-limit
    /// token is acquired.
    pub async fn resolve_endpoint(&self) -> String {
        match self
            .selector
            .best_provider(self.network, &self.registry, &self.health)
            .await
        {
            Some(selected) => {
                *self.active_provider.write().await =
                    if selected.is_custom { None } else { Some(selected.id.clone()) };
                selected.url
            }
            None => {
                self.logger.warn(&format!(
                    "no provider selectable for {}; returning fallback endpoint",
                    self.network
                ));
                fallback_endpoint(self.network).to_string()
            }
        }
    }

    /// Same as [`Manager::resolve_endpoint`] but also acquires a
    /// rate-limit token on the chosen provider. On timeout, tries the
    /// next-best provider once; if that also times out, falls back to
    /// the hard-coded endpoint.
    pub async fn resolve_endpoint_with_rate_limit(&self, timeout: Duration) -> String {
        let selected = self
            .selector
            .best_provider(self.network, &self.registry, &self.health)
            .await;

        let Some(selected) = selected else {
            return fallback_endpoint(self.network).to_string();
        };
        if selected.is_custom {
            return selected.url;
        }

        if let Some(limiter) = self.rate_limiters.get(&selected.id).map(|e| e.clone()) {
            if limiter.acquire(timeout).await {
                *self.active_provider.write().await = Some(selected.id.clone());
                return selected.url;
            }
        }

        let fallback_choice = self
            .selector
            .handle_provider_failure(&selected.id, self.network, &self.registry, &self.health)
            .await;

        if let Some(next) = fallback_choice {
            if next.is_custom {
                return next.url;
            }
            if let Some(limiter) = self.rate_limiters.get(&next.id).map(|e| e.clone()) {
                if limiter.acquire(timeout).await {
                    *self.active_provider.write().await = Some(next.id.clone());
                    return next.url;
                }
            }
        }

        fallback_endpoint(self.network).to_string()
    }

    /// Inform the rate limiter of the currently active provider.
    pub async fn report_success(&self) {
        let Some(id) = self.active_provider.read().await.clone() else {
            return;
        };
        if let Some(limiter) = self.rate_limiters.get(&id) {
            limiter.report_success().await;
        }
        self.emit_snapshot().await;
    }

    /// Classify a caller-reported error by substring and react.
    pub async fn report_error(&self, message: &str) {
        let Some(id) = self.active_provider.read().await.clone() else {
            return;
        };
        let class = classify(None, message);

        if let Some(limiter) = self.rate_limiters.get(&id).map(|e| e.clone()) {
            match class {
                ErrorClass::RateLimited => limiter.report_rate_limit_error().await,
                _ => limiter.report_error().await,
            }
        }

        match class {
            ErrorClass::RateLimited => self.health.mark_degraded(&id, self.network, message).await,
            ErrorClass::TransientServerError
            | ErrorClass::PermanentEndpointError
            | ErrorClass::Timeout => self.health.mark_offline(&id, self.network, message).await,
            _ => self.health.mark_degraded(&id, self.network, message).await,
        }

        self.selector
            .handle_provider_failure(&id, self.network, &self.registry, &self.health)
            .await;
        self.emit_snapshot().await;
    }

    pub async fn set_selected_provider(&self, id: Option<String>) {
        self.selector.set_selected_provider(id).await;
        self.emit_snapshot().await;
    }

    pub async fn set_auto_select(&self, auto: bool) {
        self.selector.set_auto_select(auto).await;
        self.emit_snapshot().await;
    }

    pub async fn set_custom_endpoint(&self, endpoint: Option<String>) {
        self.selector.set_custom_endpoint(endpoint).await;
        self.emit_snapshot().await;
    }

    pub async fn is_using_custom_endpoint(&self) -> bool {
        self.selector.is_using_custom_endpoint().await
    }

    pub async fn selected_provider_id(&self) -> Option<String> {
        self.selector.selected_provider_id().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerSnapshot> {
        self.subscribers.subscribe()
    }

    /// Start a periodic background probe sweep. The returned manager
    /// must be held as an `Arc` so the spawned task can hold its own
    /// strong reference.
    pub async fn start_background_probing(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.probe_all().await;
            }
        });
        let mut guard = self.background_probe.lock().await;
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    /// Stop background probing, clear listeners, release references. Any
    /// in-flight probe races to completion; its result is accepted if it
    /// lands before this returns, discarded otherwise.
    pub async fn destroy(&self) {
        if let Some(handle) = self.background_probe.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn snapshot(&self) -> ManagerSnapshot {
        let health_map = self.health.all(self.network).await;
        let mut providers = HashMap::with_capacity(health_map.len());
        for (id, health) in health_map {
            let rate_limit = match self.rate_limiters.get(&id) {
                Some(limiter) => limiter.snapshot().await,
                None => RateLimiterSnapshot {
                    tokens: 0.0,
                    current_backoff_ms: 0,
                    consecutive_errors: 0,
                },
            };
            providers.insert(id, ProviderSnapshot { health, rate_limit });
        }
        let is_testing = providers
            .values()
            .any(|p| p.health.status == HealthStatus::Testing);
        let best = self
            .selector
            .best_provider(self.network, &self.registry, &self.health)
            .await;

        ManagerSnapshot {
            network: self.network,
            initialized: true,
            is_testing,
            providers,
            best_provider_id: best.map(|b| b.id),
            selected_provider_id: self.selector.selected_provider_id().await,
            auto_select: self.selector.auto_select().await,
            custom_endpoint: self.selector.custom_endpoint().await,
        }
    }

    async fn emit_snapshot(&self) {
        let snapshot = self.snapshot().await;
        let _ = self.subscribers.send(snapshot);
    }

    async fn probe_all(&self) {
        let providers = self.registry.for_network(self.network).await;
        let refs: Vec<&ResolvedProvider> = providers.iter().collect();
        let limiters: HashMap<String, Arc<RateLimiter>> = self
            .rate_limiters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.health
            .probe_all(&refs, &limiters, &self.http, Some(self.orbs_discovery.as_ref()))
            .await;
        self.emit_snapshot().await;
    }
}
