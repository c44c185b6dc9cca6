//! # Broker Errors
//!
//! Error handling for the credential broker.
//!
//! Two families live here and must not be confused:
//! - [`ProviderError`] is a raw upstream failure. It never reaches the caller
//!   of an invocation; the classifier turns it into a fallback reply.
//! - [`BrokerError`] is a rejected request. Configuration-class problems
//!   (missing key, corrupted credential, nothing usable configured) and
//!   persistence failures surface to the caller through it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw failure reported by an upstream model provider.
///
/// Providers construct these without interpreting the cause; the broker's
/// classifier is the only place that maps them onto the internal taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderError {
    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upstream request timed out: {message}")]
    Timeout { message: String },

    #[error("Connection to upstream failed: {message}")]
    Connection { message: String },

    #[error("Output for {model} stopped at the length limit")]
    LengthLimited { model: String },

    #[error("Output for {model} was blocked by the content filter")]
    ContentFiltered { model: String },

    #[error("Upstream response could not be decoded: {message}")]
    InvalidResponse { message: String },

    #[error("Upstream error: {message}")]
    Other { message: String }
}

impl ProviderError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into()
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into()
        }
    }

    /// Raw message suitable for operator logs. Never shown to tenants.
    pub fn raw_message(&self) -> String {
        self.to_string()
    }
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection to {backend} failed: {reason}")]
    ConnectionError { backend: String, reason: String },

    #[error("Query on {backend} failed: {reason}")]
    QueryError { backend: String, reason: String },

    #[error("Serialization error: {error_type} - {reason}")]
    SerializationError { error_type: String, reason: String },

    #[error("Not found on {backend}:{id}")]
    NotFound { backend: String, id: String }
}

/// Symmetric encryption errors raised while sealing or opening a secret.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },

    #[error("Invalid encrypted data format: {reason}")]
    InvalidFormat { reason: String }
}

/// Errors that reject an invocation outright instead of producing a fallback.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Credential {credential_id} not found for tenant {tenant_id}")]
    CredentialNotFound {
        tenant_id: String,
        credential_id: String
    },

    #[error("Credential {credential_id} could not be decrypted: {reason}")]
    DecryptionError {
        credential_id: String,
        reason: String
    },

    #[error("No usable {provider} credential for tenant {tenant_id}")]
    NoUsableCredential { tenant_id: String, provider: String },

    #[error("No provider registered for {provider}")]
    ProviderUnavailable { provider: String },

    #[error("Persistence failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {reason}")]
    Internal { reason: String }
}

impl BrokerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into()
        }
    }

    /// Stable machine-readable code for the rejection.
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::ConfigurationError { .. } => "configuration_error",
            BrokerError::CredentialNotFound { .. } => "credential_not_found",
            BrokerError::DecryptionError { .. } => "decryption_error",
            BrokerError::NoUsableCredential { .. } => "no_usable_credential",
            BrokerError::ProviderUnavailable { .. } => "provider_unavailable",
            BrokerError::Storage(_) => "storage_error",
            BrokerError::Internal { .. } => "internal_error"
        }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
