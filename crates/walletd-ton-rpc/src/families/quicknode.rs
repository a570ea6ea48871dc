use super::FamilyAdapter;
use crate::config::ProviderType;

/// QuickNode carries its key in the subdomain; no header is needed.
pub struct QuicknodeAdapter;

impl FamilyAdapter for QuicknodeAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Quicknode
    }
}
