//! # WalletD TON RPC
//!
//! Multi-provider RPC endpoint selection, health checking and rate limiting
//! for TON (The Open Network).
//!
//! This crate decides, for a given network, which configured TON RPC
//! endpoint a caller should send its next request to. It does not execute
//! the request itself: callers get back a concrete endpoint URL (and
//! optionally a rate-limit token), make the HTTP call with whatever client
//! they prefer, and report the outcome back so the next selection can take
//! it into account.
//!
//! ## Example
//!
//! ```ignore
//! use walletd_ton_rpc::{Manager, ConfigDocument, Network};
//!
//! let doc: ConfigDocument = serde_json::from_str(raw_json)?;
//! let manager = Manager::init(Network::Mainnet, doc, false).await?;
//!
//! let url = manager.resolve_endpoint().await;
//! // ... perform the RPC call against `url` ...
//! manager.report_success().await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod families;
pub mod health;
pub mod logging;
pub mod manager;
pub mod normalizer;
pub mod rate_limiter;
pub mod registry;
pub mod selector;

pub use config::{
    ConfigDocument, ConfigError, DefaultsConfig, Network, ProviderConfig, ProviderType,
};
pub use error::ErrorClass;
pub use health::{HealthChecker, HealthResult, HealthStatus};
pub use logging::{RpcLogger, TracingLogger};
pub use manager::{Manager, ManagerError, ManagerSnapshot, ProviderSnapshot};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use registry::{ProviderRegistry, ResolvedProvider};
pub use selector::{Selector, SelectorConfig};
