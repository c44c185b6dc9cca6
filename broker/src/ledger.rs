//! Usage Ledger.
//!
//! Thread counters only ever move through additive merges in the
//! conversation repository. Tenant billing takes one of two disjoint paths
//! keyed by the tenant's paid flag.

use broker_core::{
    ConversationRepository, LedgerBucket, LedgerDelta, ProviderKind, TenantAccounts, TenantId,
    ThreadId,
};
use errors::BrokerError;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Charge {
    /// Paid tenant: credit deducted.
    Credit(f64),
    /// Free tenant: free-message count after the increment.
    FreeMessage(u64),
}

pub struct UsageLedger {
    conversations: Arc<dyn ConversationRepository>,
    accounts: Arc<dyn TenantAccounts>,
}

impl UsageLedger {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        accounts: Arc<dyn TenantAccounts>,
    ) -> Self {
        Self {
            conversations,
            accounts,
        }
    }

    /// Additive merge into one bucket. Zero deltas are not written.
    pub async fn merge(
        &self,
        thread_id: &ThreadId,
        bucket: LedgerBucket,
        delta: &LedgerDelta,
    ) -> Result<(), BrokerError> {
        if delta.is_zero() {
            return Ok(());
        }
        let ledger = self
            .conversations
            .merge_ledger(thread_id, bucket, delta)
            .await?;
        tracing::debug!(
            thread_id = %thread_id,
            bucket = %bucket,
            total_used = ledger.response.total_used,
            total_cost = %utils::format_cost(ledger.response.total_cost),
            "Ledger merged"
        );
        Ok(())
    }

    pub async fn charge(
        &self,
        tenant_id: &TenantId,
        thread_id: &ThreadId,
        provider: ProviderKind,
        credit: f64,
    ) -> Result<Charge, BrokerError> {
        if self.accounts.is_paid(tenant_id).await? {
            self.accounts
                .deduct_credit(tenant_id, thread_id, credit)
                .await?;
            Ok(Charge::Credit(credit))
        } else {
            let count = self
                .accounts
                .increment_free_messages(tenant_id, provider)
                .await?;
            Ok(Charge::FreeMessage(count))
        }
    }
}
