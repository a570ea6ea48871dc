//! Health checker: probes endpoints, classifies failures, and
//! tracks block-height freshness per network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::Network;
use crate::error::{classify, ErrorClass};
use crate::families::{self, OrbsDiscovery};
use crate::logging::RpcLogger;
use crate::normalizer;
use crate::rate_limiter::RateLimiter;
use crate::registry::ResolvedProvider;

/// Per-(provider, network) health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Untested,
    Testing,
    Available,
    Degraded,
    Stale,
    Offline,
}

/// Observed health for one provider on one network.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub status: HealthStatus,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub seqno: Option<i64>,
    pub blocks_behind: u64,
    #[serde(skip)]
    pub last_tested: Option<Instant>,
    pub error: Option<String>,
    pub browser_compatible: bool,
}

impl HealthResult {
    fn untested(browser_compatible: bool) -> Self {
        HealthResult {
            status: HealthStatus::Untested,
            success: false,
            latency_ms: None,
            seqno: None,
            blocks_behind: 0,
            last_tested: None,
            error: None,
            browser_compatible,
        }
    }

    fn testing(previous: &HealthResult) -> Self {
        HealthResult {
            status: HealthStatus::Testing,
            success: false,
            last_tested: None,
            ..previous.clone()
        }
    }

    /// Whether this result's status clears the selector's minimum bar.
    pub fn is_selectable(&self, min_status: &[HealthStatus]) -> bool {
        min_status.contains(&self.status)
    }
}

/// Tunables for probing (timeouts, thresholds, batching).
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckerConfig {
    pub probe_timeout: Duration,
    pub degraded_latency_ms: u64,
    pub max_blocks_behind: u64,
    pub batch_size: usize,
    pub batch_delay_floor: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        HealthCheckerConfig {
            probe_timeout: Duration::from_secs(10),
            degraded_latency_ms: 1500,
            max_blocks_behind: 10,
            batch_size: 2,
            batch_delay_floor: Duration::from_millis(500),
        }
    }
}

fn probe_body() -> serde_json::Value {
    serde_json::json!({
        "id": "1",
        "jsonrpc": "2.0",
        "method": "getMasterchainInfo",
        "params": {},
    })
}

enum Envelope {
    Success { seqno: i64 },
    Failure { message: String },
}

/// Parse the response body: try `{ok, result, error}`,
/// then `{result}`, then a direct `{last: {seqno}}` body, then `{error}`.
fn parse_envelope(body: &serde_json::Value) -> Envelope {
    if let Some(ok) = body.get("ok").and_then(|v| v.as_bool()) {
        if ok {
            if let Some(result) = body.get("result") {
                return match extract_seqno(result) {
                    Some(seqno) => Envelope::Success { seqno },
                    None => Envelope::Failure {
                        message: "invalid seqno".to_string(),
                    },
                };
            }
            return Envelope::Failure {
                message: "unknown envelope".to_string(),
            };
        }
        let message = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Envelope::Failure { message };
    }

    if let Some(result) = body.get("result") {
        return match extract_seqno(result) {
            Some(seqno) => Envelope::Success { seqno },
            None => Envelope::Failure {
                message: "invalid seqno".to_string(),
            },
        };
    }

    if let Some(seqno) = extract_seqno(body) {
        return Envelope::Success { seqno };
    }

    if let Some(err) = body.get("error") {
        let message = err
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Envelope::Failure { message };
    }

    Envelope::Failure {
        message: "unknown envelope".to_string(),
    }
}

fn extract_seqno(value: &serde_json::Value) -> Option<i64> {
    value
        .get("last")
        .and_then(|last| last.get("seqno"))
        .and_then(|seqno| seqno.as_i64())
        .filter(|seqno| *seqno > 0)
}

const CORS_SUBSTRINGS: &[&str] = &[
    "cors",
    "access-control",
    "x-ton-client-version",
    "blocked by cors policy",
    "not allowed by access-control-allow-headers",
];

fn mentions_cors(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CORS_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

type Key = (String, Network);

/// Owns the observed health of every (provider, network) pair plus the
/// network-wide highest seqno. Locks are never held across network I/O.
pub struct HealthChecker {
    config: HealthCheckerConfig,
    results: RwLock<HashMap<Key, HealthResult>>,
    highest_seqno: Mutex<HashMap<Network, i64>>,
    logger: Arc<dyn RpcLogger>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckerConfig, logger: Arc<dyn RpcLogger>) -> Self {
        HealthChecker {
            config,
            results: RwLock::new(HashMap::new()),
            highest_seqno: Mutex::new(HashMap::new()),
            logger,
        }
    }

    pub async fn get(&self, provider_id: &str, network: Network) -> Option<HealthResult> {
        self.results
            .read()
            .await
            .get(&(provider_id.to_string(), network))
            .cloned()
    }

    pub async fn all(&self, network: Network) -> HashMap<String, HealthResult> {
        self.results
            .read()
            .await
            .iter()
            .filter(|((_, n), _)| *n == network)
            .map(|((id, _), result)| (id.clone(), result.clone()))
            .collect()
    }

    pub async fn highest_seqno(&self, network: Network) -> Option<i64> {
        self.highest_seqno.lock().await.get(&network).copied()
    }

    async fn set(&self, provider_id: &str, network: Network, result: HealthResult) {
        self.results
            .write()
            .await
            .insert((provider_id.to_string(), network), result);
    }

    /// Explicit hook used by the manager when a caller reports a failure
    /// against the currently selected provider.
    pub async fn mark_offline(&self, provider_id: &str, network: Network, reason: &str) {
        let mut guard = self.results.write().await;
        let entry = guard
            .entry((provider_id.to_string(), network))
            .or_insert_with(|| HealthResult::untested(true));
        entry.status = HealthStatus::Offline;
        entry.success = false;
        entry.error = Some(reason.to_string());
    }

    pub async fn mark_degraded(&self, provider_id: &str, network: Network, reason: &str) {
        let mut guard = self.results.write().await;
        let entry = guard
            .entry((provider_id.to_string(), network))
            .or_insert_with(|| HealthResult::untested(true));
        entry.status = HealthStatus::Degraded;
        entry.success = false;
        entry.error = Some(reason.to_string());
    }

    /// Single-probe algorithm for one provider.
    #[allow(clippy::too_many_arguments)]
    pub async fn probe(
        &self,
        provider: &ResolvedProvider,
        rate_limiter: &RateLimiter,
        http: &reqwest::Client,
        orbs_discovery: Option<&dyn OrbsDiscovery>,
    ) -> HealthResult {
        let network = provider.network;
        let previous = self
            .get(&provider.id, network)
            .await
            .unwrap_or_else(|| HealthResult::untested(provider.browser_compatible));
        self.set(&provider.id, network, HealthResult::testing(&previous))
            .await;

        if !rate_limiter.acquire(self.config.probe_timeout).await {
            let result = HealthResult {
                status: HealthStatus::Offline,
                success: false,
                latency_ms: None,
                seqno: previous.seqno,
                blocks_behind: previous.blocks_behind,
                last_tested: Some(Instant::now()),
                error: Some("rate limit timeout".to_string()),
                browser_compatible: previous.browser_compatible,
            };
            self.set(&provider.id, network, result.clone()).await;
            return result;
        }

        let adapter = families::adapter_for(provider.provider_type);
        if let Err(cause) = adapter.validate_credentials(provider) {
            let result = HealthResult {
                status: HealthStatus::Offline,
                success: false,
                latency_ms: None,
                seqno: previous.seqno,
                blocks_behind: previous.blocks_behind,
                last_tested: Some(Instant::now()),
                error: Some(cause),
                browser_compatible: previous.browser_compatible,
            };
            self.set(&provider.id, network, result.clone()).await;
            return result;
        }

        let static_endpoint = provider
            .endpoint(crate::config::ApiVersion::V2)
            .or_else(|| provider.endpoint(crate::config::ApiVersion::V3))
            .or_else(|| provider.endpoint(crate::config::ApiVersion::V4))
            .unwrap_or("")
            .to_string();

        let raw_endpoint = if provider.is_dynamic {
            match orbs_discovery {
                Some(discovery) => discovery
                    .discover(network)
                    .await
                    .unwrap_or(static_endpoint),
                None => static_endpoint,
            }
        } else {
            static_endpoint
        };

        let has_key = provider.api_key.is_some();
        let url = normalizer::normalize_url(provider.provider_type, &raw_endpoint, has_key);
        let headers = adapter.build_headers(provider);

        let start = Instant::now();
        let outcome = self.post_probe(http, &url, &headers).await;

        let (outcome, attributed_to_fallback) = if needs_onfinality_fallback(
            provider.provider_type,
            &url,
            &outcome,
        ) {
            let fallback_url =
                normalizer::normalize_url(provider.provider_type, &raw_endpoint, false);
            (self.post_probe(http, &fallback_url, &[]).await, true)
        } else {
            (outcome, false)
        };

        let elapsed_ms = Instant::now().saturating_duration_since(start).as_millis() as u64;

        let result = match outcome {
            Ok(body) => self.handle_success(network, body, elapsed_ms, &previous).await,
            Err(probe_error) => {
                if attributed_to_fallback {
                    self.logger.debug(&format!(
                        "provider '{}': onfinality /public fallback also failed",
                        provider.id
                    ));
                }
                self.handle_failure(rate_limiter, probe_error, elapsed_ms, &previous)
                    .await
            }
        };

        self.set(&provider.id, network, result.clone()).await;
        result
    }

    async fn post_probe(
        &self,
        http: &reqwest::Client,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<serde_json::Value, ProbeError> {
        let mut request = http
            .post(url)
            .timeout(self.config.probe_timeout)
            .json(&probe_body());
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ProbeError {
                    status: None,
                    message: "timeout".to_string(),
                }
            } else {
                ProbeError {
                    status: None,
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProbeError {
                status: Some(status.as_u16()),
                message: if text.is_empty() {
                    status.to_string()
                } else {
                    text
                },
            });
        }

        let text = response.text().await.unwrap_or_default();
        serde_json::from_str::<serde_json::Value>(&text).map_err(|err| ProbeError {
            status: None,
            message: if text.is_empty() {
                format!("invalid json: {err}")
            } else {
                text
            },
        })
    }

    async fn handle_success(
        &self,
        network: Network,
        body: serde_json::Value,
        latency_ms: u64,
        previous: &HealthResult,
    ) -> HealthResult {
        match parse_envelope(&body) {
            Envelope::Success { seqno } => {
                let mut highest = self.highest_seqno.lock().await;
                let entry = highest.entry(network).or_insert(seqno);
                if seqno > *entry {
                    *entry = seqno;
                }
                let highest_seqno = *entry;
                drop(highest);

                let blocks_behind = highest_seqno.saturating_sub(seqno).max(0) as u64;
                let status = if blocks_behind > self.config.max_blocks_behind {
                    HealthStatus::Stale
                } else if latency_ms > self.config.degraded_latency_ms {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Available
                };

                HealthResult {
                    status,
                    success: true,
                    latency_ms: Some(latency_ms),
                    seqno: Some(seqno),
                    blocks_behind,
                    last_tested: Some(Instant::now()),
                    error: None,
                    browser_compatible: previous.browser_compatible,
                }
            }
            Envelope::Failure { message } => {
                self.failure_result(None, &message, previous, None).await
            }
        }
    }

    async fn handle_failure(
        &self,
        rate_limiter: &RateLimiter,
        probe_error: ProbeError,
        elapsed_ms: u64,
        previous: &HealthResult,
    ) -> HealthResult {
        let class = classify(probe_error.status, &probe_error.message);
        if class == ErrorClass::RateLimited {
            rate_limiter.report_rate_limit_error().await;
        }
        let latency_ms = if class == ErrorClass::Timeout {
            None
        } else {
            Some(elapsed_ms)
        };
        self.failure_result(probe_error.status, &probe_error.message, previous, latency_ms)
            .await
    }

    async fn failure_result(
        &self,
        status_code: Option<u16>,
        message: &str,
        previous: &HealthResult,
        latency_ms: Option<u64>,
    ) -> HealthResult {
        let class = classify(status_code, message);
        let status = match class {
            ErrorClass::RateLimited => HealthStatus::Degraded,
            _ => HealthStatus::Offline,
        };
        let browser_compatible = if mentions_cors(message) {
            false
        } else {
            previous.browser_compatible
        };

        HealthResult {
            status,
            success: false,
            latency_ms,
            seqno: previous.seqno,
            blocks_behind: previous.blocks_behind,
            last_tested: Some(Instant::now()),
            error: Some(message.to_string()),
            browser_compatible,
        }
    }

    /// Probe a batch of providers in small concurrent groups (default 2)
    /// with an inter-batch delay derived from the slowest-allowed RPS in
    /// the batch, floor 500ms. Avoids 429 storms against low-RPS
    /// providers from probing everything at once.
    pub async fn probe_all<'a>(
        &self,
        providers: &[&'a ResolvedProvider],
        rate_limiters: &HashMap<String, Arc<RateLimiter>>,
        http: &reqwest::Client,
        orbs_discovery: Option<&dyn OrbsDiscovery>,
    ) -> Vec<(&'a str, HealthResult)> {
        let mut results = Vec::with_capacity(providers.len());
        for batch in providers.chunks(self.config.batch_size.max(1)) {
            let futures = batch.iter().map(|&provider| {
                let limiter = rate_limiters.get(&provider.id).cloned();
                async move {
                    match limiter {
                        Some(limiter) => {
                            let result = self.probe(provider, &limiter, http, orbs_discovery).await;
                            (provider.id.as_str(), result)
                        }
                        None => (
                            provider.id.as_str(),
                            HealthResult::untested(provider.browser_compatible),
                        ),
                    }
                }
            });
            results.extend(futures::future::join_all(futures).await);

            let min_rps = batch.iter().map(|p| p.rps).min().unwrap_or(1).max(1);
            let delay = Duration::from_millis((1000 / min_rps as u64).max(1))
                .max(self.config.batch_delay_floor);
            tokio::time::sleep(delay).await;
        }
        results
    }
}

struct ProbeError {
    status: Option<u16>,
    message: String,
}

fn needs_onfinality_fallback(
    provider_type: crate::config::ProviderType,
    attempted_url: &str,
    outcome: &Result<serde_json::Value, ProbeError>,
) -> bool {
    if provider_type != crate::config::ProviderType::Onfinality {
        return false;
    }
    if !attempted_url.to_ascii_lowercase().ends_with("/rpc") {
        return false;
    }
    matches!(outcome, Err(e) if e.message.to_ascii_lowercase().contains("backend error"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_result_wrapper() {
        let body = serde_json::json!({"ok": true, "result": {"last": {"seqno": 42}}});
        match parse_envelope(&body) {
            Envelope::Success { seqno } => assert_eq!(seqno, 42),
            Envelope::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn parses_json_rpc_result_shape() {
        let body = serde_json::json!({"result": {"last": {"seqno": 7}}});
        match parse_envelope(&body) {
            Envelope::Success { seqno } => assert_eq!(seqno, 7),
            Envelope::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn parses_direct_last_body() {
        let body = serde_json::json!({"last": {"seqno": 99}});
        match parse_envelope(&body) {
            Envelope::Success { seqno } => assert_eq!(seqno, 99),
            Envelope::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn rejects_non_positive_seqno() {
        let body = serde_json::json!({"last": {"seqno": 0}});
        match parse_envelope(&body) {
            Envelope::Failure { message } => assert_eq!(message, "invalid seqno"),
            Envelope::Success { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn parses_explicit_error_shape() {
        let body = serde_json::json!({"error": "boom"});
        match parse_envelope(&body) {
            Envelope::Failure { message } => assert_eq!(message, "boom"),
            Envelope::Success { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn unknown_shape_is_a_failure() {
        let body = serde_json::json!({"foo": "bar"});
        match parse_envelope(&body) {
            Envelope::Failure { message } => assert_eq!(message, "unknown envelope"),
            Envelope::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn mark_offline_and_mark_degraded_set_success_false() {
        let checker = HealthChecker::new(
            HealthCheckerConfig::default(),
            Arc::new(crate::logging::TracingLogger),
        );
        checker.mark_offline("p1", Network::Mainnet, "boom").await;
        let result = checker.get("p1", Network::Mainnet).await.unwrap();
        assert_eq!(result.status, HealthStatus::Offline);
        assert!(!result.success);

        checker.mark_degraded("p1", Network::Mainnet, "slow").await;
        let result = checker.get("p1", Network::Mainnet).await.unwrap();
        assert_eq!(result.status, HealthStatus::Degraded);
        assert!(!result.success);
    }

    #[test]
    fn cors_substrings_are_detected_case_insensitively() {
        assert!(mentions_cors("Blocked by CORS policy"));
        assert!(mentions_cors("missing X-TON-Client-Version header"));
        assert!(!mentions_cors("plain network error"));
    }
}
