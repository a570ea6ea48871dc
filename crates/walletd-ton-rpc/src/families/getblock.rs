use super::FamilyAdapter;
use crate::config::ProviderType;

/// GetBlock sends its key both in the URL path and as an `x-api-key`
/// header.
pub struct GetblockAdapter;

impl FamilyAdapter for GetblockAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Getblock
    }
}
