use super::FamilyAdapter;
use crate::config::ProviderType;

/// Generic fallback adapter for `custom`, `ankr`, and `tonhub`: sends
/// `x-api-key` if a key is configured, and otherwise
/// makes no assumptions about the endpoint's shape.
pub struct CustomAdapter;

impl FamilyAdapter for CustomAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Custom
    }
}
