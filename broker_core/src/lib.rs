//! # Broker Core
//!
//! Shared types and boundary traits for the credential broker.
//!
//! This crate provides:
//! - Identifiers and domain records (credentials, requests, outcomes,
//!   ledgers, conversation memory)
//! - The traits every external collaborator is reached through: credential
//!   store, conversation repository, tenant accounts, counter store,
//!   instruction store and model providers
//!
//! Nothing in here performs I/O. Implementations live in `storage` (document
//! store and counters) and `broker` (providers).

pub mod traits;
pub mod types;

pub use traits::{
    ConversationRepository, CounterStore, CredentialStore, InstructionStore, Provider,
    TenantAccounts,
};
pub use types::{
    ChatMessage, Completion, ConversationMemory, CredentialId, CredentialRecord, ErrorKind,
    Exchange, FunctionalityClass, InvocationOutcome, InvocationRequest, LedgerBucket, LedgerDelta,
    MessageLogEntry, ModelSettings, PromptPayload, ProviderCall, ProviderKind, ProviderResponse,
    Role, SecretString, TenantId, ThreadId, ThreadLedger, TokenSink, Turn, UsageLedgerEntry,
};
