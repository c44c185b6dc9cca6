//! # Broker Utilities
//!
//! Hashing, id generation, log-safe truncation and the legacy dollar-string
//! cost format.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Short, stable fingerprint of a sealed secret.
///
/// Used wherever a credential must be identified in logs or counter keys
/// without revealing anything about the secret itself.
///
/// # Examples
///
/// ```
/// use utils::fingerprint;
///
/// let fp = fingerprint("sealed-bytes");
/// assert_eq!(fp.len(), 16);
/// assert_eq!(fp, fingerprint("sealed-bytes"));
/// ```
#[must_use]
pub fn fingerprint(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Generate UUID v4 string
#[must_use]
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Truncates to at most `max_chars` characters, marking the cut.
#[must_use]
pub fn truncate_for_log(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let cut: String = value.chars().take(max_chars).collect();
    format!("{cut}...(truncated)")
}

/// Parses a ledger cost stored as a dollar string (`"$0.0123"`).
///
/// Returns `None` for anything that is not a finite, non-negative amount.
#[must_use]
pub fn parse_cost(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let number = trimmed.strip_prefix('$').unwrap_or(trimmed);
    number
        .parse::<f64>()
        .ok()
        .filter(|c| c.is_finite() && *c >= 0.0)
}

/// Formats a cost in the dollar-string form used by stored ledgers.
#[must_use]
pub fn format_cost(cost: f64) -> String {
    format!("${cost}")
}
