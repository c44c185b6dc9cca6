//! # Environment Variable Loader
//!
//! Loads broker configuration from environment variables following 12-factor
//! app principles.
//!
//! # Naming Convention
//! Every variable carries the `BROKER_` prefix. The process key also honours
//! the bare `SECURITY_KEY` name used by older deployments.

use crate::config::{
    Config, FallbackConfig, LifecycleConfig, ObservabilityConfig, PricingConfig, ProvidersConfig,
    RedisConfig, SecretsConfig, SelectionConfig,
};
use std::env;

/// Load configuration from environment variables.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("Strategy: {}", config.selection.strategy);
///     Ok(())
/// }
/// ```
///
/// ## Environment Variables
/// ### Secrets
/// - `BROKER_SECURITY_KEY` (fallback `SECURITY_KEY`): process key, base64 of
///   32 bytes or a raw 32-byte string
///
/// ### Providers
/// - `BROKER_OPENAI_BASE_URL` (default: `https://api.openai.com/v1`)
/// - `BROKER_OPENROUTER_BASE_URL` (default: `https://openrouter.ai/api/v1`)
/// - `BROKER_ANTHROPIC_BASE_URL` (default: `https://api.anthropic.com`)
/// - `BROKER_ANTHROPIC_VERSION` (default: `2023-06-01`)
/// - `BROKER_REQUEST_TIMEOUT_SECONDS` (default: 60)
/// - `BROKER_STREAM_IDLE_TIMEOUT_SECONDS` (default: 30)
///
/// ### Lifecycle
/// - `BROKER_COMPACTION_THRESHOLD` (default: 4)
/// - `BROKER_COMPACTION_MAX_TOKENS` (default: 512)
/// - `BROKER_TITLE_MAX_TOKENS` (default: 35)
/// - `BROKER_INSTRUCTIONS_MAX_TOKENS` (default: 256)
/// - `BROKER_MESSAGE_CREDIT` (default: 1.0)
/// - `BROKER_REVISE_INSTRUCTIONS` (true/false, default: true)
/// - `BROKER_RECENT_EXCHANGE_LIMIT` (default: 10)
///
/// ### Selection, Redis, Observability
/// - `BROKER_SELECTION_STRATEGY` (single/round_robin/least_used)
/// - `BROKER_REDIS_URL` (optional)
/// - `BROKER_REDIS_KEY_PREFIX` (default: "broker")
/// - `BROKER_LOG_LEVEL` (trace/debug/info/warn/error, default: "info")
/// - `BROKER_METRICS_ENABLED` (true/false, default: true)
///
/// Pricing tables and fallback overrides are file-only.
pub fn load_from_env() -> Result<Config, Box<dyn std::error::Error>> {
    let config = Config {
        secrets: load_secrets_from_env(),
        providers: load_providers_from_env()?,
        lifecycle: load_lifecycle_from_env()?,
        selection: load_selection_from_env()?,
        pricing: PricingConfig::default(),
        fallback: FallbackConfig::default(),
        redis: load_redis_from_env()?,
        observability: load_observability_from_env()?,
    };

    Ok(config)
}

fn load_secrets_from_env() -> SecretsConfig {
    SecretsConfig {
        security_key: env::var("BROKER_SECURITY_KEY")
            .or_else(|_| env::var("SECURITY_KEY"))
            .ok()
            .filter(|k| !k.is_empty()),
    }
}

fn load_providers_from_env() -> Result<ProvidersConfig, Box<dyn std::error::Error>> {
    let defaults = ProvidersConfig::default();
    Ok(ProvidersConfig {
        openai_base_url: env::var("BROKER_OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
        openrouter_base_url: env::var("BROKER_OPENROUTER_BASE_URL")
            .unwrap_or(defaults.openrouter_base_url),
        anthropic_base_url: env::var("BROKER_ANTHROPIC_BASE_URL")
            .unwrap_or(defaults.anthropic_base_url),
        anthropic_version: env::var("BROKER_ANTHROPIC_VERSION")
            .unwrap_or(defaults.anthropic_version),
        request_timeout_seconds: parse_env("BROKER_REQUEST_TIMEOUT_SECONDS")
            .unwrap_or(defaults.request_timeout_seconds),
        stream_idle_timeout_seconds: parse_env("BROKER_STREAM_IDLE_TIMEOUT_SECONDS")
            .unwrap_or(defaults.stream_idle_timeout_seconds),
    })
}

fn load_lifecycle_from_env() -> Result<LifecycleConfig, Box<dyn std::error::Error>> {
    let defaults = LifecycleConfig::default();
    Ok(LifecycleConfig {
        compaction_threshold: parse_env("BROKER_COMPACTION_THRESHOLD")
            .unwrap_or(defaults.compaction_threshold),
        compaction_max_tokens: parse_env("BROKER_COMPACTION_MAX_TOKENS")
            .unwrap_or(defaults.compaction_max_tokens),
        title_max_tokens: parse_env("BROKER_TITLE_MAX_TOKENS")
            .unwrap_or(defaults.title_max_tokens),
        instructions_max_tokens: parse_env("BROKER_INSTRUCTIONS_MAX_TOKENS")
            .unwrap_or(defaults.instructions_max_tokens),
        message_credit: parse_env("BROKER_MESSAGE_CREDIT").unwrap_or(defaults.message_credit),
        revise_instructions: parse_env("BROKER_REVISE_INSTRUCTIONS")
            .unwrap_or(defaults.revise_instructions),
        recent_exchange_limit: parse_env("BROKER_RECENT_EXCHANGE_LIMIT")
            .unwrap_or(defaults.recent_exchange_limit),
    })
}

fn load_selection_from_env() -> Result<SelectionConfig, Box<dyn std::error::Error>> {
    Ok(SelectionConfig {
        strategy: env::var("BROKER_SELECTION_STRATEGY")
            .unwrap_or_else(|_| SelectionConfig::default().strategy),
    })
}

fn load_redis_from_env() -> Result<RedisConfig, Box<dyn std::error::Error>> {
    Ok(RedisConfig {
        url: env::var("BROKER_REDIS_URL").ok().filter(|u| !u.is_empty()),
        key_prefix: env::var("BROKER_REDIS_KEY_PREFIX")
            .unwrap_or_else(|_| RedisConfig::default().key_prefix),
    })
}

fn load_observability_from_env() -> Result<ObservabilityConfig, Box<dyn std::error::Error>> {
    Ok(ObservabilityConfig {
        logging_level: env::var("BROKER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        metrics_enabled: parse_env("BROKER_METRICS_ENABLED").unwrap_or(true),
    })
}

fn parse_env<T>(key: &str) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(s) => s
            .parse::<T>()
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
        Err(e) => Err(Box::new(e) as Box<dyn std::error::Error>),
    }
}
