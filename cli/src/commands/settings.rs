use anyhow::Result;
use clap::{Args, ValueEnum};

use super::ConfigSource;
use crate::output;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub source: ConfigSource,

    #[arg(long, value_enum, default_value = "yaml", help = "Output format")]
    pub format: Format,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Format {
    Yaml,
    Json,
}

/// The security key is never printed; only its presence is reported.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = args.source.load()?;
    let key_state = if config.secrets.security_key.is_some() {
        "configured"
    } else {
        "missing"
    };

    match args.format {
        Format::Json => {
            let mut doc = serde_json::to_value(&config)?;
            doc["secrets"] = serde_json::json!({ "security_key": key_state });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Format::Yaml => {
            print!("{}", serde_yaml::to_string(&config)?);
            println!("# secrets.security_key: {key_state}");
            if config.secrets.security_key.is_none() {
                output::warn("No security key: the broker will refuse to start");
            }
        }
    }
    Ok(())
}
