//! Tenant billing state held in process memory.

use async_trait::async_trait;
use broker_core::{ProviderKind, TenantAccounts, TenantId, ThreadId};
use dashmap::DashMap;
use errors::StorageError;

#[derive(Debug, Clone, PartialEq)]
pub struct CreditDeduction {
    pub thread_id: ThreadId,
    pub amount: f64,
}

#[derive(Debug, Clone, Default)]
struct Account {
    paid: bool,
    credits: f64,
    deductions: Vec<CreditDeduction>,
}

/// Unknown tenants are treated as free-tier.
#[derive(Default)]
pub struct InMemoryTenantAccounts {
    accounts: DashMap<TenantId, Account>,
    free_messages: DashMap<(TenantId, ProviderKind), u64>,
}

impl InMemoryTenantAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paid(&self, tenant_id: TenantId, credits: f64) {
        let mut account = self.accounts.entry(tenant_id).or_default();
        account.paid = true;
        account.credits = credits;
    }

    pub fn set_free(&self, tenant_id: TenantId) {
        self.accounts.entry(tenant_id).or_default().paid = false;
    }

    pub fn credits(&self, tenant_id: &TenantId) -> f64 {
        self.accounts.get(tenant_id).map_or(0.0, |a| a.credits)
    }

    pub fn deductions(&self, tenant_id: &TenantId) -> Vec<CreditDeduction> {
        self.accounts
            .get(tenant_id)
            .map(|a| a.deductions.clone())
            .unwrap_or_default()
    }

    pub fn free_messages(&self, tenant_id: &TenantId, provider: ProviderKind) -> u64 {
        self.free_messages
            .get(&(tenant_id.clone(), provider))
            .map_or(0, |c| *c)
    }
}

#[async_trait]
impl TenantAccounts for InMemoryTenantAccounts {
    async fn is_paid(&self, tenant_id: &TenantId) -> Result<bool, StorageError> {
        Ok(self.accounts.get(tenant_id).is_some_and(|a| a.paid))
    }

    async fn deduct_credit(
        &self,
        tenant_id: &TenantId,
        thread_id: &ThreadId,
        amount: f64,
    ) -> Result<(), StorageError> {
        let mut account = self
            .accounts
            .get_mut(tenant_id)
            .ok_or_else(|| StorageError::NotFound {
                backend: "memory".to_string(),
                id: tenant_id.to_string(),
            })?;
        account.credits -= amount;
        account.deductions.push(CreditDeduction {
            thread_id: thread_id.clone(),
            amount,
        });
        Ok(())
    }

    async fn increment_free_messages(
        &self,
        tenant_id: &TenantId,
        provider: ProviderKind,
    ) -> Result<u64, StorageError> {
        let mut count = self
            .free_messages
            .entry((tenant_id.clone(), provider))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new("acme".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_free() {
        let accounts = InMemoryTenantAccounts::new();
        assert!(!accounts.is_paid(&tenant()).await.unwrap());
    }

    #[tokio::test]
    async fn test_paid_deduction_is_recorded() {
        let accounts = InMemoryTenantAccounts::new();
        accounts.set_paid(tenant(), 10.0);
        let thread = ThreadId::new("t1".to_string()).unwrap();

        accounts.deduct_credit(&tenant(), &thread, 1.5).await.unwrap();

        assert_eq!(accounts.credits(&tenant()), 8.5);
        assert_eq!(
            accounts.deductions(&tenant()),
            vec![CreditDeduction {
                thread_id: thread,
                amount: 1.5
            }]
        );
    }

    #[tokio::test]
    async fn test_free_messages_counted_per_provider() {
        let accounts = InMemoryTenantAccounts::new();
        accounts
            .increment_free_messages(&tenant(), ProviderKind::OpenAi)
            .await
            .unwrap();
        let count = accounts
            .increment_free_messages(&tenant(), ProviderKind::OpenAi)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(accounts.free_messages(&tenant(), ProviderKind::Anthropic), 0);
    }
}
