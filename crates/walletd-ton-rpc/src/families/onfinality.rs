use super::FamilyAdapter;
use crate::config::ProviderType;

/// OnFinality sends `apikey` only when a key is configured; `/public`
/// requests carry no credential at all. The `/rpc` → `/public` retry on
/// "backend error" is handled by the health checker, not here, since it
/// needs to re-probe with a different normalized URL and header set.
pub struct OnfinalityAdapter;

impl FamilyAdapter for OnfinalityAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Onfinality
    }
}
