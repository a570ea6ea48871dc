use async_trait::async_trait;

use super::FamilyAdapter;
use crate::config::{Network, ProviderType};

pub struct OrbsAdapter;

impl FamilyAdapter for OrbsAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Orbs
    }
}

/// Orbs resolves its real endpoint via an external discovery call made on
/// every resolution. Modeled as a trait so tests and embedders can
/// swap in a stub instead of hitting the network.
#[async_trait]
pub trait OrbsDiscovery: Send + Sync {
    /// Discover the live endpoint for `network`. A `None` return (or an
    /// error surfaced internally) means the caller should fall back to
    /// the provider's configured static endpoint.
    async fn discover(&self, network: Network) -> Option<String>;
}

/// Default discovery client: a plain HTTP GET against Orbs' discovery
/// service. Network failures are swallowed and surfaced as `None` so
/// callers always have a well-defined fallback path.
pub struct HttpOrbsDiscovery {
    client: reqwest::Client,
    discovery_base_url: String,
}

impl HttpOrbsDiscovery {
    pub fn new(client: reqwest::Client) -> Self {
        HttpOrbsDiscovery {
            client,
            discovery_base_url: "https://node-discovery.orbs.network".to_string(),
        }
    }

    pub fn with_base_url(client: reqwest::Client, discovery_base_url: String) -> Self {
        HttpOrbsDiscovery {
            client,
            discovery_base_url,
        }
    }
}

#[async_trait]
impl OrbsDiscovery for HttpOrbsDiscovery {
    async fn discover(&self, network: Network) -> Option<String> {
        let url = format!("{}/{}", self.discovery_base_url, network);
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: serde_json::Value = response.json().await.ok()?;
        body.get("endpoint")?.as_str().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDiscovery(Option<String>);

    #[async_trait]
    impl OrbsDiscovery for StubDiscovery {
        async fn discover(&self, _network: Network) -> Option<String> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn stub_returns_configured_value() {
        let discovery = StubDiscovery(Some("https://node.orbs.network/api/v2".to_string()));
        assert_eq!(
            discovery.discover(Network::Mainnet).await,
            Some("https://node.orbs.network/api/v2".to_string())
        );
    }

    #[tokio::test]
    async fn stub_can_simulate_discovery_failure() {
        let discovery = StubDiscovery(None);
        assert_eq!(discovery.discover(Network::Mainnet).await, None);
    }
}
