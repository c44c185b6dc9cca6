//! # Storage Layer
//!
//! Persistence adapters for the credential broker.
//!
//! - [`encryption`]: AES-256-GCM sealing of tenant credentials with the
//!   process key
//! - In-memory implementations of the `broker_core` store traits, keyed the
//!   way the document store keys its collections
//! - [`redis`]: a counter store shared across broker processes

pub mod accounts;
pub mod conversation;
pub mod counters;
pub mod credentials;
pub mod encryption;
pub mod instructions;
pub mod redis;

pub use accounts::{CreditDeduction, InMemoryTenantAccounts};
pub use conversation::InMemoryConversationRepository;
pub use counters::InMemoryCounterStore;
pub use credentials::InMemoryCredentialStore;
pub use encryption::{SealedSecret, SecretCipher};
pub use instructions::InMemoryInstructionStore;
pub use redis::RedisCounterStore;
