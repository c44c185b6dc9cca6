//! # Configuration Structures
//!
//! All configuration structures for the credential broker.
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization
//! - Use `validator` for input validation
//! - Default every field so partial files and env overlays compose

use broker_core::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

/// Top-level broker configuration.
///
/// ## Usage
/// ```rust,no_run
/// use config::Config;
///
/// let config = Config::default();
/// println!("Compaction threshold: {}", config.lifecycle.compaction_threshold);
/// ```
///
/// ## Fields
/// - `secrets`: process-wide key used to open tenant credentials
/// - `providers`: upstream endpoints and timeouts
/// - `lifecycle`: compaction, credit and instruction-revision knobs
/// - `selection`: credential selection strategy
/// - `pricing`: per-model token prices used to cost each call
/// - `fallback`: overrides for the canned failure titles and contents
/// - `redis`: optional shared counter store
/// - `observability`: logging level and metrics toggle
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    #[validate(nested)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    #[validate(nested)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    #[validate(nested)]
    pub selection: SelectionConfig,

    #[serde(default)]
    #[validate(nested)]
    pub pricing: PricingConfig,

    #[serde(default)]
    #[validate(nested)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    #[validate(nested)]
    pub redis: RedisConfig,

    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

/// Process-wide secret material.
///
/// The key is never serialized back out and is redacted from `Debug`.
#[derive(Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct SecretsConfig {
    /// Base64 of 32 bytes, or a raw 32-byte string.
    #[serde(default, skip_serializing)]
    pub security_key: Option<String>,
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field(
                "security_key",
                &self.security_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProvidersConfig {
    #[serde(default = "default_openai_base_url")]
    #[validate(url)]
    pub openai_base_url: String,

    #[serde(default = "default_openrouter_base_url")]
    #[validate(url)]
    pub openrouter_base_url: String,

    #[serde(default = "default_anthropic_base_url")]
    #[validate(url)]
    pub anthropic_base_url: String,

    #[serde(default = "default_anthropic_version")]
    #[validate(length(min = 1))]
    pub anthropic_version: String,

    /// Upper bound for one provider call, streaming included.
    #[serde(default = "default_request_timeout_seconds")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_seconds: u64,

    /// Longest silence tolerated between two streamed chunks.
    #[serde(default = "default_stream_idle_timeout_seconds")]
    #[validate(range(min = 1, max = 600))]
    pub stream_idle_timeout_seconds: u64,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    60
}

fn default_stream_idle_timeout_seconds() -> u64 {
    30
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai_base_url: default_openai_base_url(),
            openrouter_base_url: default_openrouter_base_url(),
            anthropic_base_url: default_anthropic_base_url(),
            anthropic_version: default_anthropic_version(),
            request_timeout_seconds: default_request_timeout_seconds(),
            stream_idle_timeout_seconds: default_stream_idle_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct LifecycleConfig {
    /// Compaction runs once a thread holds more turns than this.
    #[serde(default = "default_compaction_threshold")]
    #[validate(range(min = 1))]
    pub compaction_threshold: usize,

    #[serde(default = "default_compaction_max_tokens")]
    #[validate(range(min = 1))]
    pub compaction_max_tokens: u32,

    #[serde(default = "default_title_max_tokens")]
    #[validate(range(min = 1))]
    pub title_max_tokens: u32,

    #[serde(default = "default_instructions_max_tokens")]
    #[validate(range(min = 1))]
    pub instructions_max_tokens: u32,

    /// Credit deducted from paid tenants per generated response.
    #[serde(default = "default_message_credit")]
    #[validate(range(min = 0.0))]
    pub message_credit: f64,

    #[serde(default = "default_revise_instructions")]
    pub revise_instructions: bool,

    /// Exchanges fed into one instruction revision.
    #[serde(default = "default_recent_exchange_limit")]
    #[validate(range(min = 1, max = 100))]
    pub recent_exchange_limit: usize,
}

fn default_compaction_threshold() -> usize {
    4
}

fn default_compaction_max_tokens() -> u32 {
    512
}

fn default_title_max_tokens() -> u32 {
    35
}

fn default_instructions_max_tokens() -> u32 {
    256
}

fn default_message_credit() -> f64 {
    1.0
}

fn default_revise_instructions() -> bool {
    true
}

fn default_recent_exchange_limit() -> usize {
    10
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: default_compaction_threshold(),
            compaction_max_tokens: default_compaction_max_tokens(),
            title_max_tokens: default_title_max_tokens(),
            instructions_max_tokens: default_instructions_max_tokens(),
            message_credit: default_message_credit(),
            revise_instructions: default_revise_instructions(),
            recent_exchange_limit: default_recent_exchange_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SelectionConfig {
    /// `single`, `round_robin` or `least_used`.
    #[serde(default = "default_selection_strategy")]
    #[validate(custom(function = "validate_selection_strategy"))]
    pub strategy: String,
}

fn default_selection_strategy() -> String {
    "single".to_string()
}

fn validate_selection_strategy(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "single" | "round_robin" | "least_used" => Ok(()),
        _ => Err(validator::ValidationError::new("Invalid selection strategy")),
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            strategy: default_selection_strategy(),
        }
    }
}

/// USD price per 1K tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate, PartialEq)]
pub struct ModelPrice {
    #[validate(range(min = 0.0))]
    pub prompt_per_1k: f64,

    #[validate(range(min = 0.0))]
    pub completion_per_1k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct PricingConfig {
    /// Used for any model without its own entry.
    #[serde(default = "default_model_price")]
    #[validate(nested)]
    pub default: ModelPrice,

    #[serde(default = "default_model_prices")]
    #[validate(custom(function = "validate_model_prices"))]
    pub models: HashMap<String, ModelPrice>,
}

impl PricingConfig {
    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.models.get(model).copied().unwrap_or(self.default)
    }
}

fn default_model_price() -> ModelPrice {
    ModelPrice {
        prompt_per_1k: 0.00015,
        completion_per_1k: 0.0006,
    }
}

fn default_model_prices() -> HashMap<String, ModelPrice> {
    [
        ("gpt-4o-mini", 0.00015, 0.0006),
        ("gpt-4o", 0.0025, 0.01),
        ("gpt-4.1-mini", 0.0004, 0.0016),
        ("gpt-4.1", 0.002, 0.008),
        ("openai/gpt-4.1-mini", 0.0004, 0.0016),
        ("claude-3-5-haiku-latest", 0.0008, 0.004),
        ("claude-sonnet-4-0", 0.003, 0.015),
    ]
    .into_iter()
    .map(|(model, prompt, completion)| {
        (
            model.to_string(),
            ModelPrice {
                prompt_per_1k: prompt,
                completion_per_1k: completion,
            },
        )
    })
    .collect()
}

fn validate_model_prices(
    prices: &HashMap<String, ModelPrice>,
) -> Result<(), validator::ValidationError> {
    let valid = prices.values().all(|p| {
        p.prompt_per_1k.is_finite()
            && p.prompt_per_1k >= 0.0
            && p.completion_per_1k.is_finite()
            && p.completion_per_1k >= 0.0
    });
    if valid {
        Ok(())
    } else {
        Err(validator::ValidationError::new("Invalid model price"))
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default: default_model_price(),
            models: default_model_prices(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FallbackTextConfig {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct FallbackConfig {
    /// Keyed by error kind (`rate_limited`, `not_found`, ...).
    #[serde(default)]
    #[validate(custom(function = "validate_fallback_overrides"))]
    pub overrides: HashMap<String, FallbackTextConfig>,
}

fn validate_fallback_overrides(
    overrides: &HashMap<String, FallbackTextConfig>,
) -> Result<(), validator::ValidationError> {
    for (kind, text) in overrides {
        if kind.parse::<ErrorKind>().is_err() {
            return Err(validator::ValidationError::new("Unknown error kind"));
        }
        if text.title.trim().is_empty() || text.content.trim().is_empty() {
            return Err(validator::ValidationError::new("Empty fallback text"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct RedisConfig {
    /// When unset, counters live in process memory.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_key_prefix")]
    #[validate(length(min = 1, max = 64))]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "broker".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_logging_level")]
    #[validate(custom(function = "validate_logging_level"))]
    pub logging_level: String,

    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_logging_level() -> String {
    "info".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn validate_logging_level(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(validator::ValidationError::new("Invalid logging level")),
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            logging_level: default_logging_level(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}
