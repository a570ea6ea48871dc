use super::FamilyAdapter;
use crate::config::ProviderType;
use crate::registry::ResolvedProvider;

/// Tatum requires its `x-api-key` header; unlike every other family, a
/// missing key is a hard validation failure rather than a degraded-auth
/// fallback.
pub struct TatumAdapter;

impl FamilyAdapter for TatumAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Tatum
    }

    fn validate_credentials(&self, provider: &ResolvedProvider) -> Result<(), String> {
        if provider.api_key.is_none() {
            return Err(format!(
                "provider '{}' is a tatum endpoint but has no api key configured",
                provider.id
            ));
        }
        Ok(())
    }
}
