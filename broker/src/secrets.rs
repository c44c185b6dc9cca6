//! Secret Store Adapter.
//!
//! Reads sealed credential records from the credential store and opens them
//! with the process key. No business logic lives here.

use broker_core::{CredentialId, CredentialRecord, CredentialStore, SecretString, TenantId};
use errors::BrokerError;
use std::sync::Arc;
use storage::SecretCipher;

pub struct SecretStoreAdapter {
    store: Arc<dyn CredentialStore>,
    cipher: SecretCipher,
}

impl SecretStoreAdapter {
    pub fn new(store: Arc<dyn CredentialStore>, cipher: SecretCipher) -> Self {
        Self { store, cipher }
    }

    /// Fails with `ConfigurationError` when the process key is absent or
    /// unusable, before any credential is read.
    pub fn from_config(
        store: Arc<dyn CredentialStore>,
        secrets: &config::SecretsConfig,
    ) -> Result<Self, BrokerError> {
        let cipher = SecretCipher::from_config(secrets)
            .map_err(|e| BrokerError::configuration(e.to_string()))?;
        Ok(Self::new(store, cipher))
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub async fn resolve(
        &self,
        tenant_id: &TenantId,
        credential_id: &CredentialId,
    ) -> Result<CredentialRecord, BrokerError> {
        self.store
            .get(tenant_id, credential_id)
            .await?
            .ok_or_else(|| BrokerError::CredentialNotFound {
                tenant_id: tenant_id.to_string(),
                credential_id: credential_id.to_string(),
            })
    }

    /// Plaintext for one invocation. A corrupted envelope is a
    /// `DecryptionError`, never `CredentialNotFound`.
    pub fn open(&self, record: &CredentialRecord) -> Result<SecretString, BrokerError> {
        self.cipher.open(&record.encrypted_secret).map_err(|e| {
            tracing::error!(
                tenant_id = %record.tenant_id,
                credential_id = %record.id,
                fingerprint = %utils::fingerprint(&record.encrypted_secret),
                error = %e,
                "Credential could not be decrypted"
            );
            BrokerError::DecryptionError {
                credential_id: record.id.to_string(),
                reason: e.to_string(),
            }
        })
    }
}
