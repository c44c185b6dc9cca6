//! Credential Selector.
//!
//! Picks one live credential for a tenant and provider. How a choice is made
//! among several live credentials is a pluggable [`SelectionStrategy`]; the
//! default serves single-credential tenants. Usage is tracked in the
//! namespaced [`CounterStore`] through atomic increments only.

use crate::telemetry::Telemetry;
use async_trait::async_trait;
use broker_core::{
    CounterStore, CredentialId, CredentialRecord, CredentialStore, FunctionalityClass,
    InvocationRequest, ProviderKind, TenantId,
};
use config::SelectionConfig;
use errors::{BrokerError, StorageError};
use std::sync::Arc;

/// Tokens spent by a tenant on one provider and functionality.
pub fn usage_key(tenant_id: &TenantId, provider: ProviderKind, functionality: FunctionalityClass) -> String {
    format!("usage:{tenant_id}:{provider}:{functionality}")
}

/// Tokens spent through one credential.
pub fn credential_usage_key(
    tenant_id: &TenantId,
    provider: ProviderKind,
    credential_id: &CredentialId,
) -> String {
    format!("usage:{tenant_id}:{provider}:cred:{credential_id}")
}

pub fn rotation_key(
    tenant_id: &TenantId,
    provider: ProviderKind,
    functionality: FunctionalityClass,
) -> String {
    format!("rr:{tenant_id}:{provider}:{functionality}")
}

/// Who is asking; handed to strategies alongside the live candidates.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub tenant_id: &'a TenantId,
    pub provider: ProviderKind,
    pub functionality: FunctionalityClass,
}

/// Chooses among live credentials. `candidates` is never empty and is
/// sorted by credential id.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn choose(
        &self,
        ctx: SelectionContext<'_>,
        candidates: Vec<CredentialRecord>,
        counters: &dyn CounterStore,
    ) -> Result<CredentialRecord, StorageError>;
}

/// Tenants are expected to hold one live credential per provider.
pub struct SingleCredential;

#[async_trait]
impl SelectionStrategy for SingleCredential {
    fn name(&self) -> &'static str {
        "single"
    }

    async fn choose(
        &self,
        ctx: SelectionContext<'_>,
        candidates: Vec<CredentialRecord>,
        _counters: &dyn CounterStore,
    ) -> Result<CredentialRecord, StorageError> {
        if candidates.len() > 1 {
            tracing::warn!(
                tenant_id = %ctx.tenant_id,
                provider = %ctx.provider,
                live = candidates.len(),
                "Several live credentials under single selection, using the first"
            );
        }
        first(candidates)
    }
}

/// Rotates through live credentials per tenant, provider and functionality.
pub struct RoundRobin;

#[async_trait]
impl SelectionStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    async fn choose(
        &self,
        ctx: SelectionContext<'_>,
        mut candidates: Vec<CredentialRecord>,
        counters: &dyn CounterStore,
    ) -> Result<CredentialRecord, StorageError> {
        if candidates.len() == 1 {
            return first(candidates);
        }
        let key = rotation_key(ctx.tenant_id, ctx.provider, ctx.functionality);
        let turn = counters.increment(&key, 1).await?;
        let index = (turn.saturating_sub(1) % candidates.len() as u64) as usize;
        Ok(candidates.swap_remove(index))
    }
}

/// Prefers the credential with the fewest recorded tokens.
pub struct LeastUsed;

#[async_trait]
impl SelectionStrategy for LeastUsed {
    fn name(&self) -> &'static str {
        "least_used"
    }

    async fn choose(
        &self,
        ctx: SelectionContext<'_>,
        candidates: Vec<CredentialRecord>,
        counters: &dyn CounterStore,
    ) -> Result<CredentialRecord, StorageError> {
        if candidates.len() == 1 {
            return first(candidates);
        }
        let mut best: Option<(u64, CredentialRecord)> = None;
        for candidate in candidates {
            let used = counters
                .get(&credential_usage_key(ctx.tenant_id, ctx.provider, &candidate.id))
                .await?;
            // Ties keep the earlier id.
            if best.as_ref().is_none_or(|(lowest, _)| used < *lowest) {
                best = Some((used, candidate));
            }
        }
        best.map(|(_, record)| record)
            .ok_or_else(|| no_candidates(ctx))
    }
}

fn first(candidates: Vec<CredentialRecord>) -> Result<CredentialRecord, StorageError> {
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::NotFound {
            backend: "selector".to_string(),
            id: "candidate".to_string(),
        })
}

fn no_candidates(ctx: SelectionContext<'_>) -> StorageError {
    StorageError::NotFound {
        backend: "selector".to_string(),
        id: format!("{}:{}", ctx.tenant_id, ctx.provider),
    }
}

pub fn strategy_from_config(config: &SelectionConfig) -> Arc<dyn SelectionStrategy> {
    match config.strategy.as_str() {
        "round_robin" => Arc::new(RoundRobin),
        "least_used" => Arc::new(LeastUsed),
        "single" => Arc::new(SingleCredential),
        other => {
            tracing::warn!(strategy = other, "Unknown selection strategy, using single");
            Arc::new(SingleCredential)
        }
    }
}

pub struct CredentialSelector {
    credentials: Arc<dyn CredentialStore>,
    counters: Arc<dyn CounterStore>,
    strategy: Arc<dyn SelectionStrategy>,
    telemetry: Telemetry,
}

impl CredentialSelector {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        counters: Arc<dyn CounterStore>,
        strategy: Arc<dyn SelectionStrategy>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            credentials,
            counters,
            strategy,
            telemetry,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn select(
        &self,
        tenant_id: &TenantId,
        provider: ProviderKind,
        functionality: FunctionalityClass,
    ) -> Result<CredentialRecord, BrokerError> {
        let mut live: Vec<CredentialRecord> = self
            .credentials
            .list(tenant_id, provider)
            .await?
            .into_iter()
            .filter(|c| !c.is_deprecated)
            .collect();

        if live.is_empty() {
            return Err(BrokerError::NoUsableCredential {
                tenant_id: tenant_id.to_string(),
                provider: provider.to_string(),
            });
        }
        live.sort_by(|a, b| a.id.cmp(&b.id));

        let ctx = SelectionContext {
            tenant_id,
            provider,
            functionality,
        };
        let chosen = self
            .strategy
            .choose(ctx, live, self.counters.as_ref())
            .await?;
        tracing::debug!(
            tenant_id = %tenant_id,
            provider = %provider,
            credential_id = %chosen.id,
            strategy = self.strategy.name(),
            "Credential selected"
        );
        Ok(chosen)
    }

    /// Honours a pinned credential when the request carries one, otherwise
    /// selects.
    pub async fn select_for(
        &self,
        request: &InvocationRequest,
    ) -> Result<CredentialRecord, BrokerError> {
        let Some(credential_id) = &request.credential_id else {
            return self
                .select(&request.tenant_id, request.provider, request.functionality)
                .await;
        };

        let record = self
            .credentials
            .get(&request.tenant_id, credential_id)
            .await?
            .ok_or_else(|| BrokerError::CredentialNotFound {
                tenant_id: request.tenant_id.to_string(),
                credential_id: credential_id.to_string(),
            })?;

        if record.is_deprecated || record.provider != request.provider {
            return Err(BrokerError::NoUsableCredential {
                tenant_id: request.tenant_id.to_string(),
                provider: request.provider.to_string(),
            });
        }
        Ok(record)
    }

    /// Idempotent. Later selections skip the credential; invocations already
    /// holding it are unaffected.
    pub async fn mark_deprecated(&self, record: &CredentialRecord) -> Result<(), BrokerError> {
        self.credentials.set_deprecated(&record.id, true).await?;
        self.telemetry.record_deprecation(record.provider);
        tracing::info!(
            tenant_id = %record.tenant_id,
            provider = %record.provider,
            credential_id = %record.id,
            model = %record.model_name,
            "Credential marked deprecated"
        );
        Ok(())
    }

    pub async fn record_usage(
        &self,
        record: &CredentialRecord,
        functionality: FunctionalityClass,
        tokens: u64,
    ) -> Result<(), BrokerError> {
        if tokens == 0 {
            return Ok(());
        }
        self.counters
            .increment(
                &usage_key(&record.tenant_id, record.provider, functionality),
                tokens,
            )
            .await?;
        self.counters
            .increment(
                &credential_usage_key(&record.tenant_id, record.provider, &record.id),
                tokens,
            )
            .await?;
        Ok(())
    }
}
