//! # Configuration File Loading
//!
//! Loads broker configuration from TOML or YAML files.
//!
//! Supports automatic format detection based on file extension.

use crate::config::Config;
use std::path::Path;

/// Configuration file loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(String),

    #[error("Config file has no extension")]
    NoExtension,

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),
}

/// Load configuration from a TOML file.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_toml;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_toml(Path::new("broker.toml"))?;
///     println!("Threshold: {}", config.lifecycle.compaction_threshold);
///     Ok(())
/// }
/// ```
///
/// Sections and fields that are absent take their defaults.
pub fn load_from_toml(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigFileError::FileNotFound(path.display().to_string()))?;

    toml::from_str(&contents).map_err(|e| ConfigFileError::TomlParse(e.to_string()))
}

/// Load configuration from a YAML file.
pub fn load_from_yaml(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigFileError::FileNotFound(path.display().to_string()))?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigFileError::YamlParse(e.to_string()))
}

/// Load configuration from file, detecting the format from its extension
/// (`.toml`, `.yaml`, `.yml`).
pub fn load_from_file(path: &Path) -> Result<Config, ConfigFileError> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or(ConfigFileError::NoExtension)?;

    match extension.to_lowercase().as_str() {
        "toml" => load_from_toml(path),
        "yaml" | "yml" => load_from_yaml(path),
        other => Err(ConfigFileError::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broker.toml");

        let toml_content = r#"
[lifecycle]
compaction_threshold = 6
message_credit = 2.5

[selection]
strategy = "least_used"

[pricing.models."my-model"]
prompt_per_1k = 0.001
completion_per_1k = 0.002

[fallback.overrides.rate_limited]
title = "Busy right now"
content = "Please retry in a minute."

[observability]
logging_level = "debug"
"#;
        fs::write(&path, toml_content).unwrap();

        let config = load_from_toml(&path).unwrap();
        assert_eq!(config.lifecycle.compaction_threshold, 6);
        assert_eq!(config.lifecycle.message_credit, 2.5);
        assert_eq!(config.lifecycle.title_max_tokens, 35);
        assert_eq!(config.selection.strategy, "least_used");
        assert_eq!(config.pricing.price_for("my-model").completion_per_1k, 0.002);
        assert_eq!(
            config.fallback.overrides["rate_limited"].title,
            "Busy right now"
        );
        assert_eq!(config.observability.logging_level, "debug");
    }

    #[test]
    fn test_load_from_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broker.yml");

        let yaml_content = r#"
providers:
  request_timeout_seconds: 15
redis:
  url: "redis://localhost:6379"
  key_prefix: "tenant-broker"
"#;
        fs::write(&path, yaml_content).unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.providers.request_timeout_seconds, 15);
        assert_eq!(config.providers.stream_idle_timeout_seconds, 30);
        assert_eq!(config.redis.url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.redis.key_prefix, "tenant-broker");
    }

    #[test]
    fn test_load_from_file_missing() {
        let result = load_from_file(Path::new("/nonexistent/broker.toml"));
        assert!(matches!(result, Err(ConfigFileError::FileNotFound(_))));
    }

    #[test]
    fn test_load_from_file_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broker.ini");
        fs::write(&path, "x=1").unwrap();
        assert!(matches!(
            load_from_file(&path),
            Err(ConfigFileError::UnsupportedFormat(ext)) if ext == "ini"
        ));
        assert!(matches!(
            load_from_file(&dir.path().join("broker")),
            Err(ConfigFileError::NoExtension)
        ));
    }

    #[test]
    fn test_load_from_toml_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broker.toml");
        fs::write(&path, "[lifecycle\ncompaction_threshold = ").unwrap();
        assert!(matches!(
            load_from_toml(&path),
            Err(ConfigFileError::TomlParse(_))
        ));
    }
}
