//! Boundary traits for the broker's external collaborators.
//!
//! Every store is treated as a consistent key-value repository. Mutations
//! are additive or idempotent; none of these traits offers a wholesale
//! overwrite of a ledger.

use crate::types::{
    ConversationMemory, CredentialId, CredentialRecord, Exchange, LedgerBucket, LedgerDelta,
    MessageLogEntry, ProviderCall, ProviderKind, ProviderResponse, Role, TenantId, ThreadId,
    ThreadLedger, TokenSink, Turn,
};
use async_trait::async_trait;
use errors::{ProviderError, StorageError};

/// Tenant credential records, still sealed.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: &TenantId,
        credential_id: &CredentialId,
    ) -> Result<Option<CredentialRecord>, StorageError>;

    /// All of a tenant's credentials for one provider, deprecated included.
    async fn list(
        &self,
        tenant_id: &TenantId,
        provider: ProviderKind,
    ) -> Result<Vec<CredentialRecord>, StorageError>;

    /// Idempotent flag update.
    async fn set_deprecated(
        &self,
        credential_id: &CredentialId,
        is_deprecated: bool,
    ) -> Result<(), StorageError>;
}

/// Conversation state keyed by thread.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Appends a turn and returns the resulting turn count.
    async fn append_turn(
        &self,
        thread_id: &ThreadId,
        role: Role,
        content: &str,
    ) -> Result<usize, StorageError>;

    async fn recent_turns(&self, thread_id: &ThreadId, n: usize)
    -> Result<Vec<Turn>, StorageError>;

    async fn memory(&self, thread_id: &ThreadId) -> Result<ConversationMemory, StorageError>;

    /// Atomically replaces the whole history with a single summary turn.
    async fn replace_history_with_summary(
        &self,
        thread_id: &ThreadId,
        summary: &str,
    ) -> Result<(), StorageError>;

    /// Additive merge into one ledger bucket; returns the updated ledger.
    async fn merge_ledger(
        &self,
        thread_id: &ThreadId,
        bucket: LedgerBucket,
        delta: &LedgerDelta,
    ) -> Result<ThreadLedger, StorageError>;

    async fn ledger(&self, thread_id: &ThreadId) -> Result<ThreadLedger, StorageError>;

    async fn set_title(&self, thread_id: &ThreadId, title: &str) -> Result<(), StorageError>;

    async fn set_response_model(
        &self,
        thread_id: &ThreadId,
        model_name: &str,
    ) -> Result<(), StorageError>;

    /// Writes a classified error code into the tenant-visible message log.
    async fn log_error_code(
        &self,
        thread_id: &ThreadId,
        error_code: &str,
    ) -> Result<(), StorageError>;

    async fn message_log(&self, thread_id: &ThreadId)
    -> Result<Vec<MessageLogEntry>, StorageError>;
}

/// Tenant billing state. Paid and free tenants take disjoint paths.
#[async_trait]
pub trait TenantAccounts: Send + Sync {
    async fn is_paid(&self, tenant_id: &TenantId) -> Result<bool, StorageError>;

    async fn deduct_credit(
        &self,
        tenant_id: &TenantId,
        thread_id: &ThreadId,
        amount: f64,
    ) -> Result<(), StorageError>;

    /// Returns the tenant's free-message count for the provider after the
    /// increment.
    async fn increment_free_messages(
        &self,
        tenant_id: &TenantId,
        provider: ProviderKind,
    ) -> Result<u64, StorageError>;
}

/// Namespaced counters with atomic increments only.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, key: &str, by: u64) -> Result<u64, StorageError>;

    async fn get(&self, key: &str) -> Result<u64, StorageError>;
}

/// Per-brain custom instructions and the exchanges that feed their revision.
#[async_trait]
pub trait InstructionStore: Send + Sync {
    async fn record_exchange(&self, brain_id: &str, exchange: Exchange)
    -> Result<(), StorageError>;

    async fn should_revise(&self, brain_id: &str) -> Result<bool, StorageError>;

    async fn current_instructions(&self, brain_id: &str) -> Result<Option<String>, StorageError>;

    async fn recent_exchanges(
        &self,
        brain_id: &str,
        limit: usize,
    ) -> Result<Vec<Exchange>, StorageError>;

    async fn update_instructions(
        &self,
        brain_id: &str,
        instructions: &str,
    ) -> Result<(), StorageError>;
}

/// A model provider. Failures are reported raw; interpretation happens in
/// the broker's classifier.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Submits one call. Streaming calls push tokens into `sink` as they
    /// arrive and still return the assembled response.
    async fn submit(
        &self,
        call: &ProviderCall,
        sink: Option<&TokenSink>,
    ) -> Result<ProviderResponse, ProviderError>;
}
