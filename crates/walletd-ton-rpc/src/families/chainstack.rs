use super::FamilyAdapter;
use crate::config::ProviderType;

/// Chainstack carries its key inside the URL path (already substituted by
/// the registry); no header is needed.
pub struct ChainstackAdapter;

impl FamilyAdapter for ChainstackAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Chainstack
    }
}
