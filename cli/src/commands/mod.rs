pub mod classify;
pub mod completion;
pub mod keygen;
pub mod seal;
pub mod settings;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "brokerctl",
    author,
    version,
    about = "brokerctl - operator tool for the credential broker",
    long_about = "Seal provider credentials with the process key, classify raw upstream \
                  errors, and inspect the effective broker configuration.\n\nConfiguration \
                  is read from the optional --config file, then BROKER_* environment variables."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Generate a fresh process security key")]
    Keygen(keygen::KeygenArgs),

    #[command(about = "Seal a provider credential with the process security key")]
    Seal(seal::SealArgs),

    #[command(about = "Classify a raw upstream failure the way the broker would")]
    Classify(classify::ClassifyArgs),

    #[command(about = "Print the effective configuration")]
    Config(settings::ConfigArgs),

    #[command(about = "Generate shell completions")]
    Completion(completion::CompletionArgs),
}

/// Shared `--config` flag for commands that need the broker configuration.
#[derive(Args, Clone, Default)]
pub struct ConfigSource {
    #[arg(long, short = 'c', help = "Configuration file (TOML or YAML)")]
    pub config: Option<PathBuf>,
}

impl ConfigSource {
    pub fn load(&self) -> anyhow::Result<config::Config> {
        config::load(self.config.as_deref()).map_err(|e| {
            let err = crate::ux_error::config_error(&e.to_string());
            err.display();
            anyhow::Error::new(err)
        })
    }
}
