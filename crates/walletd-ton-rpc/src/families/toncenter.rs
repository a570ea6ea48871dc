use super::FamilyAdapter;
use crate::config::ProviderType;

pub struct ToncenterAdapter;

impl FamilyAdapter for ToncenterAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Toncenter
    }
}
