//! # Configuration System
//!
//! Centralized configuration management for the credential broker.
//!
//! This crate provides:
//! - Configuration structures for every broker component
//! - Environment variable loading (12-factor app principles)
//! - Configuration file loading (TOML/YAML)
//! - Configuration precedence (env > file > defaults)
//! - Configuration validation

pub mod config;
pub mod file_loader;
pub mod loader;
pub mod precedence;

pub use config::{
    Config, FallbackConfig, FallbackTextConfig, LifecycleConfig, ModelPrice, ObservabilityConfig,
    PricingConfig, ProvidersConfig, RedisConfig, SecretsConfig, SelectionConfig,
};
pub use config::Config as BrokerConfig;
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::load_from_env;
pub use precedence::merge_configs;
pub use validator::Validate;

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    File(#[from] ConfigFileError),

    #[error("Failed to read environment: {0}")]
    Env(String),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Loads defaults, then the optional file, then the environment, and
/// validates the result.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let from_file = match path {
        Some(path) => load_from_file(path)?,
        None => Config::default(),
    };
    let from_env = load_from_env().map_err(|e| ConfigError::Env(e.to_string()))?;

    let config = merge_configs(Config::default(), from_file, "file", from_env, "env");
    config.validate()?;
    Ok(config)
}
