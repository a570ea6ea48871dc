//! Selector: scores providers and picks the best one for a
//! network, honoring manual overrides and the custom-endpoint bypass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::{DefaultsConfig, Network};
use crate::health::{HealthChecker, HealthResult, HealthStatus};
use crate::registry::{ProviderRegistry, ResolvedProvider};

/// Scoring weights and thresholds, all overridable.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub min_status: Vec<HealthStatus>,
    pub cooldown: Duration,
    pub preferred_latency_ms: f64,
    pub weight_status: f64,
    pub weight_latency: f64,
    pub weight_priority: f64,
    pub weight_freshness: f64,
    /// When true, only providers whose `browserCompatible` is not `false`
    /// (config AND live health flag) are considered.
    pub browser_mode: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            min_status: vec![HealthStatus::Available, HealthStatus::Degraded],
            cooldown: Duration::from_secs(30),
            preferred_latency_ms: 1000.0,
            weight_status: 0.2,
            weight_latency: 0.4,
            weight_priority: 0.3,
            weight_freshness: 0.3,
            browser_mode: false,
        }
    }
}

/// A provider the selector has chosen, or synthesized for the custom
/// endpoint bypass.
#[derive(Debug, Clone, Serialize)]
pub struct SelectedProvider {
    pub id: String,
    pub display_name: String,
    pub url: String,
    pub is_custom: bool,
}

struct CacheEntry {
    provider_id: String,
}

/// Given the registry and health checker, picks the best provider for a
/// network. Holds only the best-per-network cache and the manual
/// override state; all scoring reads live registry/health data fresh.
pub struct Selector {
    config: RwLock<SelectorConfig>,
    defaults: RwLock<DefaultsConfig>,
    best_cache: RwLock<HashMap<Network, CacheEntry>>,
    custom_endpoint: RwLock<Option<String>>,
    auto_select: RwLock<bool>,
    selected_provider_id: RwLock<Option<String>>,
}

impl Selector {
    pub fn new(config: SelectorConfig) -> Self {
        Selector {
            config: RwLock::new(config),
            defaults: RwLock::new(DefaultsConfig::default()),
            best_cache: RwLock::new(HashMap::new()),
            custom_endpoint: RwLock::new(None),
            auto_select: RwLock::new(true),
            selected_provider_id: RwLock::new(None),
        }
    }

    pub async fn set_defaults(&self, defaults: DefaultsConfig) {
        *self.defaults.write().await = defaults;
    }

    pub async fn set_custom_endpoint(&self, endpoint: Option<String>) {
        let trimmed = endpoint.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
        *self.custom_endpoint.write().await = trimmed;
    }

    pub async fn is_using_custom_endpoint(&self) -> bool {
        self.custom_endpoint.read().await.is_some()
    }

    pub async fn set_auto_select(&self, auto: bool) {
        *self.auto_select.write().await = auto;
        if auto {
            *self.selected_provider_id.write().await = None;
        }
    }

    pub async fn set_selected_provider(&self, id: Option<String>) {
        *self.selected_provider_id.write().await = id;
        *self.auto_select.write().await = false;
    }

    pub async fn selected_provider_id(&self) -> Option<String> {
        self.selected_provider_id.read().await.clone()
    }

    pub async fn auto_select(&self) -> bool {
        *self.auto_select.read().await
    }

    pub async fn custom_endpoint(&self) -> Option<String> {
        self.custom_endpoint.read().await.clone()
    }

    pub async fn update_config(&self, config: SelectorConfig) {
        *self.config.write().await = config;
    }

    /// Invalidate the best-cache for `network` if it currently names
    /// `id`, then recompute excluding `id`.
    pub async fn handle_provider_failure(
        &self,
        id: &str,
        network: Network,
        registry: &ProviderRegistry,
        health: &HealthChecker,
    ) -> Option<SelectedProvider> {
        let mut cache = self.best_cache.write().await;
        if cache.get(&network).map(|e| e.provider_id.as_str()) == Some(id) {
            cache.remove(&network);
        }
        drop(cache);
        self.compute_best(network, registry, health, Some(id)).await
    }

    /// Resolution order: custom endpoint, manual override,
    /// cached best, fresh scoring.
    pub async fn best_provider(
        &self,
        network: Network,
        registry: &ProviderRegistry,
        health: &HealthChecker,
    ) -> Option<SelectedProvider> {
        if let Some(custom) = self.custom_endpoint.read().await.clone() {
            return Some(SelectedProvider {
                id: "custom".to_string(),
                display_name: "custom".to_string(),
                url: custom,
                is_custom: true,
            });
        }

        let auto_select = *self.auto_select.read().await;
        if !auto_select {
            if let Some(id) = self.selected_provider_id.read().await.clone() {
                if let Some(provider) = registry.get(&id).await {
                    if provider.network == network {
                        return Some(to_selected(&provider));
                    }
                }
                // manual selection doesn't exist or doesn't match network: fall through
            }
        }

        {
            let cache = self.best_cache.read().await;
            if let Some(entry) = cache.get(&network) {
                if let Some(provider) = registry.get(&entry.provider_id).await {
                    if let Some(result) = health.get(&provider.id, network).await {
                        let config = self.config.read().await;
                        if result.success && result.is_selectable(&config.min_status) {
                            return Some(to_selected(&provider));
                        }
                    }
                }
            }
        }
        self.best_cache.write().await.remove(&network);

        self.compute_best(network, registry, health, None).await
    }

    async fn compute_best(
        &self,
        network: Network,
        registry: &ProviderRegistry,
        health: &HealthChecker,
        exclude: Option<&str>,
    ) -> Option<SelectedProvider> {
        let config = self.config.read().await.clone();
        let mut candidates = registry.for_network(network).await;
        if let Some(exclude) = exclude {
            candidates.retain(|p| p.id != exclude);
        }
        if config.browser_mode {
            candidates.retain(|p| p.browser_compatible);
        }

        let mut best: Option<(f64, ResolvedProvider)> = None;
        for provider in &candidates {
            let health_result = health.get(&provider.id, network).await;
            if config.browser_mode {
                if let Some(result) = &health_result {
                    if !result.browser_compatible {
                        continue;
                    }
                }
            }
            let score = score_provider(provider, health_result.as_ref(), &config);
            if score > 0.0 && best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, provider.clone()));
            } else if score > 0.0 {
                if let Some((best_score, best_provider)) = &best {
                    if score == *best_score {
                        if is_better_tiebreak(provider, best_provider) {
                            best = Some((score, provider.clone()));
                        }
                    }
                }
            }
        }

        if let Some((_, provider)) = best {
            self.best_cache.write().await.insert(
                network,
                CacheEntry {
                    provider_id: provider.id.clone(),
                },
            );
            return Some(to_selected(&provider));
        }

        // Nothing scored positive: fall back to declared default order,
        // then any untested/cooldown-expired provider. The permissive
        // "return an in-cooldown failed provider" branch is intentionally
        // not implemented (left for embedders who want that tradeoff).
        self.fallback(&candidates, &config, network, health).await
    }

    async fn fallback(
        &self,
        candidates: &[ResolvedProvider],
        config: &SelectorConfig,
        network: Network,
        health: &HealthChecker,
    ) -> Option<SelectedProvider> {
        let defaults = self.defaults.read().await;
        for id in defaults.for_network(network) {
            if let Some(provider) = candidates.iter().find(|p| &p.id == id) {
                let result = health.get(&provider.id, network).await;
                if is_retry_eligible(provider, result.as_ref(), config) {
                    return Some(to_selected(provider));
                }
            }
        }
        drop(defaults);

        for provider in candidates {
            let result = health.get(&provider.id, network).await;
            if is_retry_eligible(provider, result.as_ref(), config) {
                return Some(to_selected(provider));
            }
        }
        None
    }
}

fn is_better_tiebreak(candidate: &ResolvedProvider, current_best: &ResolvedProvider) -> bool {
    (candidate.priority, candidate.id.as_str()) < (current_best.priority, current_best.id.as_str())
}

fn is_retry_eligible(
    provider: &ResolvedProvider,
    health: Option<&HealthResult>,
    config: &SelectorConfig,
) -> bool {
    match health {
        None => true,
        Some(result) if result.status == HealthStatus::Untested => true,
        Some(result) if result.success => true,
        Some(result) => cooldown_expired(result, config),
    }
}

fn cooldown_expired(result: &HealthResult, config: &SelectorConfig) -> bool {
    match result.last_tested {
        None => true,
        Some(last_tested) => Instant::now().saturating_duration_since(last_tested) >= config.cooldown,
    }
}

fn to_selected(provider: &ResolvedProvider) -> SelectedProvider {
    let url = provider
        .endpoint(crate::config::ApiVersion::V2)
        .or_else(|| provider.endpoint(crate::config::ApiVersion::V3))
        .or_else(|| provider.endpoint(crate::config::ApiVersion::V4))
        .unwrap_or("")
        .to_string();
    let normalized = crate::normalizer::normalize_url(
        provider.provider_type,
        &url,
        provider.api_key.is_some(),
    );
    SelectedProvider {
        id: provider.id.clone(),
        display_name: provider.display_name.clone(),
        url: normalized,
        is_custom: false,
    }
}

/// Scoring.
fn score_provider(
    provider: &ResolvedProvider,
    health: Option<&HealthResult>,
    config: &SelectorConfig,
) -> f64 {
    let health = match health {
        None => return 0.01 / (provider.priority as f64 + 1.0),
        Some(h) => h,
    };

    if health.status == HealthStatus::Untested {
        return 0.01 / (provider.priority as f64 + 1.0);
    }

    if !health.success {
        return if cooldown_expired(health, config) {
            0.001 / (provider.priority as f64 + 1.0)
        } else {
            0.0
        };
    }

    if health.status == HealthStatus::Offline {
        return 0.0;
    }

    if !health.is_selectable(&config.min_status) {
        return 0.0;
    }

    let status_score = match health.status {
        HealthStatus::Available => 1.0,
        HealthStatus::Degraded => 0.5,
        HealthStatus::Stale => 0.3,
        _ => 0.0,
    };

    let latency_score = match health.latency_ms {
        None => 0.5,
        Some(latency) => {
            let ratio = latency as f64 / config.preferred_latency_ms;
            (1.0 - (ratio + 1.0).ln() / 11f64.ln()).max(0.0)
        }
    };

    let priority_score = (1.0 - provider.priority as f64 / 100.0).max(0.0);
    let freshness_score = (1.0 - health.blocks_behind as f64 / 10.0).max(0.0);

    config.weight_status * status_score
        + config.weight_latency * latency_score
        + config.weight_priority * priority_score
        + config.weight_freshness * freshness_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiVersion, ProviderType};
    use std::collections::HashMap as StdHashMap;

    fn provider(id: &str, priority: u32) -> ResolvedProvider {
        ResolvedProvider {
            id: id.to_string(),
            display_name: id.to_string(),
            provider_type: ProviderType::Toncenter,
            network: Network::Mainnet,
            endpoints: StdHashMap::from([(
                ApiVersion::V2,
                "https://example.com/api/v2".to_string(),
            )]),
            api_key: None,
            rps: 10,
            priority,
            enabled: true,
            is_dynamic: false,
            browser_compatible: true,
        }
    }

    fn available(latency_ms: u64, blocks_behind: u64) -> HealthResult {
        HealthResult {
            status: HealthStatus::Available,
            success: true,
            latency_ms: Some(latency_ms),
            seqno: Some(1000),
            blocks_behind,
            last_tested: Some(Instant::now()),
            error: None,
            browser_compatible: true,
        }
    }

    #[test]
    fn untested_scores_below_any_available_provider() {
        let config = SelectorConfig::default();
        let untested_score = score_provider(&provider("p1", 10), None, &config);
        let available_score = score_provider(&provider("p2", 50), Some(&available(900, 0)), &config);
        assert!(untested_score < available_score);
    }

    #[test]
    fn stale_loses_to_available() {
        let config = SelectorConfig::default();
        let stale = HealthResult {
            status: HealthStatus::Stale,
            blocks_behind: 11,
            ..available(100, 11)
        };
        let stale_score = score_provider(&provider("p1", 10), Some(&stale), &config);
        let available_score = score_provider(&provider("p2", 10), Some(&available(100, 0)), &config);
        assert!(stale_score < available_score);
    }

    #[test]
    fn offline_scores_zero() {
        let config = SelectorConfig::default();
        let offline = HealthResult {
            status: HealthStatus::Offline,
            success: false,
            last_tested: Some(Instant::now()),
            ..available(100, 0)
        };
        assert_eq!(score_provider(&provider("p1", 10), Some(&offline), &config), 0.0);
    }

    #[test]
    fn failed_provider_within_cooldown_scores_zero() {
        let config = SelectorConfig::default();
        let failed = HealthResult {
            status: HealthStatus::Degraded,
            success: false,
            last_tested: Some(Instant::now()),
            ..available(100, 0)
        };
        assert_eq!(score_provider(&provider("p1", 10), Some(&failed), &config), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_provider_past_cooldown_is_a_low_score_retry_candidate() {
        let mut config = SelectorConfig::default();
        config.cooldown = Duration::from_millis(10);
        let start = Instant::now();
        tokio::time::advance(Duration::from_millis(20)).await;
        let failed = HealthResult {
            status: HealthStatus::Degraded,
            success: false,
            last_tested: Some(start),
            ..available(100, 0)
        };
        let score = score_provider(&provider("p1", 10), Some(&failed), &config);
        assert!(score > 0.0);
    }
}
