//! Per-family provider adapters (auth headers, credential
//! validation). The URL-shape rules themselves live in
//! [`crate::normalizer`] since that module must stay pure and total; this
//! module is where family-specific *policy* — which headers to send,
//! whether a credential is mandatory — lives.

mod chainstack;
mod custom;
mod getblock;
mod onfinality;
mod orbs;
mod quicknode;
mod tatum;
mod toncenter;

use crate::config::ProviderType;
use crate::registry::ResolvedProvider;

/// A family adapter knows how to build request headers and validate that
/// a resolved provider has what it needs before a probe is attempted.
pub trait FamilyAdapter: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Headers to attach to the JSON-RPC POST, given the provider's
    /// materialized API key (if any).
    fn build_headers(&self, provider: &ResolvedProvider) -> Vec<(&'static str, String)> {
        crate::normalizer::build_headers(self.provider_type(), provider.api_key.as_deref())
    }

    /// Fail fast with a human-readable cause when a mandatory credential
    /// is missing, rather than letting the probe go out and bounce off a
    /// 401/403. Most families have no mandatory credential.
    fn validate_credentials(&self, _provider: &ResolvedProvider) -> Result<(), String> {
        Ok(())
    }
}

/// Look up the adapter for a provider type. Ankr/Tonhub share `custom`'s
/// adapter, consistent with normalization.
pub fn adapter_for(provider_type: ProviderType) -> &'static dyn FamilyAdapter {
    match provider_type {
        ProviderType::Toncenter => &toncenter::ToncenterAdapter,
        ProviderType::Chainstack => &chainstack::ChainstackAdapter,
        ProviderType::Quicknode => &quicknode::QuicknodeAdapter,
        ProviderType::Getblock => &getblock::GetblockAdapter,
        ProviderType::Tatum => &tatum::TatumAdapter,
        ProviderType::Onfinality => &onfinality::OnfinalityAdapter,
        ProviderType::Orbs => &orbs::OrbsAdapter,
        ProviderType::Custom | ProviderType::Ankr | ProviderType::Tonhub => &custom::CustomAdapter,
    }
}

pub use onfinality::OnfinalityAdapter;
pub use orbs::{HttpOrbsDiscovery, OrbsAdapter, OrbsDiscovery};
