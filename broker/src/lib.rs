//! # Credential Broker
//!
//! Brokers tenant access to hosted language-model providers and manages the
//! lifecycle of one model invocation: credential selection and decryption,
//! the provider call, failure classification, and the ledger and memory
//! updates that follow.
//!
//! Entry point is [`ResponseLifecycleManager::respond`].

pub mod classifier;
pub mod compactor;
pub mod fallback;
pub mod instructions;
pub mod invoker;
pub mod ledger;
pub mod lifecycle;
pub mod pricing;
pub mod providers;
pub mod secrets;
pub mod selector;
pub mod sequencer;
pub mod telemetry;

pub use classifier::{Classification, classify, rejection_kind};
pub use compactor::{Compaction, MemoryCompactor};
pub use fallback::{DEFAULT_TITLE, FallbackPolicy, FallbackText};
pub use instructions::InstructionReviser;
pub use invoker::{ProviderInvoker, TokenLimits};
pub use ledger::{Charge, UsageLedger};
pub use lifecycle::{
    Collaborators, InvocationReply, InvocationScope, LifecycleState, ReplyStatus,
    ResponseLifecycleManager,
};
pub use pricing::Pricing;
pub use providers::ProviderRegistry;
pub use secrets::SecretStoreAdapter;
pub use selector::{
    CredentialSelector, LeastUsed, RoundRobin, SelectionContext, SelectionStrategy,
    SingleCredential,
};
pub use sequencer::ThreadSequencer;
pub use telemetry::Telemetry;
