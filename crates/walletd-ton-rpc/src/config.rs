//! Format-agnostic configuration document for the provider pool.
//!
//! This module only deserializes and validates an already-parsed
//! [`ConfigDocument`]; locating a config file on disk and picking a
//! particular serialization format is left to the embedder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which TON network a manager instance serves. Immutable after init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Testnet,
    Mainnet,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Testnet => write!(f, "testnet"),
            Network::Mainnet => write!(f, "mainnet"),
        }
    }
}

/// JSON-RPC API version tag an endpoint template is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    V2,
    V3,
    V4,
    Ws,
}

/// Closed set of known provider families plus a generic fallback.
///
/// Ankr and Tonhub are recognized tags but have no bespoke normalization
/// row; they fall through to the same generic rule as [`ProviderType::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Toncenter,
    Chainstack,
    Quicknode,
    Orbs,
    Onfinality,
    Getblock,
    Tatum,
    Ankr,
    Tonhub,
    Custom,
}

fn default_rps() -> u32 {
    1
}

fn default_priority() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// Declarative provider entry, as loaded from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub network: Network,
    /// URL templates keyed by API version; templates may contain the
    /// literal token `{key}`.
    pub endpoints: HashMap<ApiVersion, String>,
    pub key_env_name: Option<String>,
    pub api_key_env_name: Option<String>,
    #[serde(default = "default_rps")]
    pub rps: u32,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_dynamic: bool,
    #[serde(default = "default_true")]
    pub browser_compatible: bool,
}

/// Declared fallback order per network, used when scoring produces no
/// positive result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub testnet: Vec<String>,
    #[serde(default)]
    pub mainnet: Vec<String>,
}

impl DefaultsConfig {
    pub fn for_network(&self, network: Network) -> &[String] {
        match network {
            Network::Testnet => &self.testnet,
            Network::Mainnet => &self.mainnet,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub version: String,
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// Validation failures for a [`ConfigDocument`], fatal at manager init.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("provider '{provider}' declares no v2/v3/v4 endpoint")]
    MissingEndpoint { provider: String },
    #[error("defaults.{network} references unknown provider '{id}'")]
    UnknownDefaultProvider { network: String, id: String },
    #[error("provider '{provider}' endpoint {version} still contains an unresolved {{key}} token")]
    UnresolvedPlaceholder { provider: String, version: String },
    #[error("provider '{provider}' has a non-positive rps")]
    InvalidRps { provider: String },
}

impl ConfigDocument {
    /// Structural validation per the documented schema constraints.
    /// Missing environment values are not validated here — they are a
    /// soft, warn-and-leave-placeholder condition resolved at probe time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, provider) in &self.providers {
            if provider.rps == 0 {
                return Err(ConfigError::InvalidRps {
                    provider: id.clone(),
                });
            }
            let has_core_endpoint = provider.endpoints.contains_key(&ApiVersion::V2)
                || provider.endpoints.contains_key(&ApiVersion::V3)
                || provider.endpoints.contains_key(&ApiVersion::V4);
            if !has_core_endpoint {
                return Err(ConfigError::MissingEndpoint {
                    provider: id.clone(),
                });
            }
        }

        for (network_name, ids) in [
            ("testnet", &self.defaults.testnet),
            ("mainnet", &self.defaults.mainnet),
        ] {
            for id in ids {
                if !self.providers.contains_key(id) {
                    return Err(ConfigError::UnknownDefaultProvider {
                        network: network_name.to_string(),
                        id: id.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Hard-coded per-network public fallback used by the manager when no
/// provider is selectable. Deliberately not a `presets` module of
/// per-chain URLs (the spec this crate implements targets TON only) —
/// a single constant is enough, and better than returning nothing.
pub fn fallback_endpoint(network: Network) -> &'static str {
    match network {
        Network::Testnet => "https://testnet.toncenter.com/api/v2/jsonRPC",
        Network::Mainnet => "https://toncenter.com/api/v2/jsonRPC",
    }
}
