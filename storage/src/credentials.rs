//! Tenant credential records held in process memory.
//!
//! Stands in for the tenant configuration collection of the document store.
//! Records stay sealed; this store never sees plaintext.

use async_trait::async_trait;
use broker_core::{CredentialId, CredentialRecord, CredentialStore, ProviderKind, TenantId};
use dashmap::DashMap;
use errors::StorageError;

#[derive(Default)]
pub struct InMemoryCredentialStore {
    records: DashMap<CredentialId, CredentialRecord>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: CredentialRecord) {
        tracing::debug!(
            tenant_id = %record.tenant_id,
            credential_id = %record.id,
            provider = %record.provider,
            fingerprint = %utils::fingerprint(&record.encrypted_secret),
            "Credential stored"
        );
        self.records.insert(record.id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(
        &self,
        tenant_id: &TenantId,
        credential_id: &CredentialId,
    ) -> Result<Option<CredentialRecord>, StorageError> {
        Ok(self
            .records
            .get(credential_id)
            .filter(|r| &r.tenant_id == tenant_id)
            .map(|r| r.value().clone()))
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        provider: ProviderKind,
    ) -> Result<Vec<CredentialRecord>, StorageError> {
        let mut records: Vec<CredentialRecord> = self
            .records
            .iter()
            .filter(|r| &r.tenant_id == tenant_id && r.provider == provider)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn set_deprecated(
        &self,
        credential_id: &CredentialId,
        is_deprecated: bool,
    ) -> Result<(), StorageError> {
        let mut record =
            self.records
                .get_mut(credential_id)
                .ok_or_else(|| StorageError::NotFound {
                    backend: "memory".to_string(),
                    id: credential_id.to_string(),
                })?;
        record.is_deprecated = is_deprecated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(id: &str, tenant: &str, provider: ProviderKind) -> CredentialRecord {
        CredentialRecord {
            id: CredentialId::new(id.to_string()).unwrap(),
            tenant_id: TenantId::new(tenant.to_string()).unwrap(),
            provider,
            model_name: "gpt-4o-mini".to_string(),
            encrypted_secret: "{}".to_string(),
            is_deprecated: false,
            extra_config: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_get_is_tenant_scoped() {
        let store = InMemoryCredentialStore::new();
        store.insert(record("c1", "acme", ProviderKind::OpenAi));

        let acme = TenantId::new("acme".to_string()).unwrap();
        let other = TenantId::new("globex".to_string()).unwrap();
        let id = CredentialId::new("c1".to_string()).unwrap();

        assert!(store.get(&acme, &id).await.unwrap().is_some());
        assert!(store.get(&other, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_provider_and_sorts() {
        let store = InMemoryCredentialStore::new();
        store.insert(record("c2", "acme", ProviderKind::OpenAi));
        store.insert(record("c1", "acme", ProviderKind::OpenAi));
        store.insert(record("c3", "acme", ProviderKind::Anthropic));

        let acme = TenantId::new("acme".to_string()).unwrap();
        let ids: Vec<String> = store
            .list(&acme, ProviderKind::OpenAi)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_set_deprecated_is_idempotent() {
        let store = InMemoryCredentialStore::new();
        store.insert(record("c1", "acme", ProviderKind::OpenAi));
        let id = CredentialId::new("c1".to_string()).unwrap();

        store.set_deprecated(&id, true).await.unwrap();
        store.set_deprecated(&id, true).await.unwrap();

        let acme = TenantId::new("acme".to_string()).unwrap();
        assert!(store.get(&acme, &id).await.unwrap().unwrap().is_deprecated);

        let missing = CredentialId::new("nope".to_string()).unwrap();
        assert!(matches!(
            store.set_deprecated(&missing, true).await,
            Err(StorageError::NotFound { .. })
        ));
    }
}
