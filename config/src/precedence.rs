//! # Configuration Precedence
//!
//! Merges configuration from multiple sources with precedence rules.
//!
//! # Precedence Order
//! 1. Environment variables (highest priority)
//! 2. Configuration file
//! 3. Default values (lowest priority)
//!
//! A field from a higher source wins only when it differs from the built-in
//! default, so a source that never mentions a field cannot reset it.

use crate::config::{
    Config, LifecycleConfig, ObservabilityConfig, PricingConfig, ProvidersConfig, RedisConfig,
};
use std::fmt::Debug;

/// Merge configuration sources with precedence.
///
/// ## Usage
/// ```rust,no_run
/// use config::{Config, merge_configs, load_from_file, load_from_env};
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let from_file = load_from_file(Path::new("broker.toml"))?;
///     let from_env = load_from_env()?;
///
///     let _config = merge_configs(Config::default(), from_file, "file", from_env, "env");
///     Ok(())
/// }
/// ```
///
/// ## Deep Merge
/// Scalar fields are overridden. Pricing tables and fallback overrides are
/// merged per key.
pub fn merge_configs(
    defaults: Config,
    file_config: Config,
    file_source_name: &str,
    env_config: Config,
    env_source_name: &str,
) -> Config {
    let config = merge_with_logging(defaults, file_config, file_source_name);
    merge_with_logging(config, env_config, env_source_name)
}

fn merge_with_logging(mut base: Config, override_config: Config, source_name: &str) -> Config {
    let mut changes = Vec::new();

    if override_config.secrets.security_key.is_some()
        && override_config.secrets.security_key != base.secrets.security_key
    {
        changes.push("secrets.security_key = ***".to_string());
        base.secrets.security_key = override_config.secrets.security_key;
    }

    merge_providers(&mut base.providers, &override_config.providers, &mut changes);
    merge_lifecycle(&mut base.lifecycle, &override_config.lifecycle, &mut changes);

    take(
        &mut base.selection.strategy,
        &override_config.selection.strategy,
        &crate::config::SelectionConfig::default().strategy,
        "selection.strategy",
        &mut changes,
    );

    merge_pricing(&mut base.pricing, &override_config.pricing, &mut changes);

    for (kind, text) in override_config.fallback.overrides {
        if base.fallback.overrides.get(&kind) != Some(&text) {
            changes.push(format!("fallback.overrides.{kind}"));
            base.fallback.overrides.insert(kind, text);
        }
    }

    merge_redis(&mut base.redis, &override_config.redis, &mut changes);
    merge_observability(
        &mut base.observability,
        &override_config.observability,
        &mut changes,
    );

    if !changes.is_empty() {
        tracing::debug!("Configuration from {}: {:?}", source_name, changes);
    }

    base
}

fn take<T>(base: &mut T, candidate: &T, default: &T, path: &str, changes: &mut Vec<String>)
where
    T: PartialEq + Clone + Debug,
{
    if candidate != default && candidate != base {
        changes.push(format!("{path} = {candidate:?}"));
        base.clone_from(candidate);
    }
}

fn merge_providers(
    base: &mut ProvidersConfig,
    override_config: &ProvidersConfig,
    changes: &mut Vec<String>,
) {
    let d = ProvidersConfig::default();
    take(
        &mut base.openai_base_url,
        &override_config.openai_base_url,
        &d.openai_base_url,
        "providers.openai_base_url",
        changes,
    );
    take(
        &mut base.openrouter_base_url,
        &override_config.openrouter_base_url,
        &d.openrouter_base_url,
        "providers.openrouter_base_url",
        changes,
    );
    take(
        &mut base.anthropic_base_url,
        &override_config.anthropic_base_url,
        &d.anthropic_base_url,
        "providers.anthropic_base_url",
        changes,
    );
    take(
        &mut base.anthropic_version,
        &override_config.anthropic_version,
        &d.anthropic_version,
        "providers.anthropic_version",
        changes,
    );
    take(
        &mut base.request_timeout_seconds,
        &override_config.request_timeout_seconds,
        &d.request_timeout_seconds,
        "providers.request_timeout_seconds",
        changes,
    );
    take(
        &mut base.stream_idle_timeout_seconds,
        &override_config.stream_idle_timeout_seconds,
        &d.stream_idle_timeout_seconds,
        "providers.stream_idle_timeout_seconds",
        changes,
    );
}

fn merge_lifecycle(
    base: &mut LifecycleConfig,
    override_config: &LifecycleConfig,
    changes: &mut Vec<String>,
) {
    let d = LifecycleConfig::default();
    take(
        &mut base.compaction_threshold,
        &override_config.compaction_threshold,
        &d.compaction_threshold,
        "lifecycle.compaction_threshold",
        changes,
    );
    take(
        &mut base.compaction_max_tokens,
        &override_config.compaction_max_tokens,
        &d.compaction_max_tokens,
        "lifecycle.compaction_max_tokens",
        changes,
    );
    take(
        &mut base.title_max_tokens,
        &override_config.title_max_tokens,
        &d.title_max_tokens,
        "lifecycle.title_max_tokens",
        changes,
    );
    take(
        &mut base.instructions_max_tokens,
        &override_config.instructions_max_tokens,
        &d.instructions_max_tokens,
        "lifecycle.instructions_max_tokens",
        changes,
    );
    take(
        &mut base.message_credit,
        &override_config.message_credit,
        &d.message_credit,
        "lifecycle.message_credit",
        changes,
    );
    take(
        &mut base.revise_instructions,
        &override_config.revise_instructions,
        &d.revise_instructions,
        "lifecycle.revise_instructions",
        changes,
    );
    take(
        &mut base.recent_exchange_limit,
        &override_config.recent_exchange_limit,
        &d.recent_exchange_limit,
        "lifecycle.recent_exchange_limit",
        changes,
    );
}

fn merge_pricing(
    base: &mut PricingConfig,
    override_config: &PricingConfig,
    changes: &mut Vec<String>,
) {
    let d = PricingConfig::default();
    take(
        &mut base.default,
        &override_config.default,
        &d.default,
        "pricing.default",
        changes,
    );
    for (model, price) in &override_config.models {
        if d.models.get(model) != Some(price) && base.models.get(model) != Some(price) {
            changes.push(format!("pricing.models.{model} = {price:?}"));
            base.models.insert(model.clone(), *price);
        }
    }
}

fn merge_redis(base: &mut RedisConfig, override_config: &RedisConfig, changes: &mut Vec<String>) {
    if override_config.url.is_some() && override_config.url != base.url {
        changes.push("redis.url = ***".to_string());
        base.url.clone_from(&override_config.url);
    }
    take(
        &mut base.key_prefix,
        &override_config.key_prefix,
        &RedisConfig::default().key_prefix,
        "redis.key_prefix",
        changes,
    );
}

fn merge_observability(
    base: &mut ObservabilityConfig,
    override_config: &ObservabilityConfig,
    changes: &mut Vec<String>,
) {
    let d = ObservabilityConfig::default();
    take(
        &mut base.logging_level,
        &override_config.logging_level,
        &d.logging_level,
        "observability.logging_level",
        changes,
    );
    take(
        &mut base.metrics_enabled,
        &override_config.metrics_enabled,
        &d.metrics_enabled,
        "observability.metrics_enabled",
        changes,
    );
}
