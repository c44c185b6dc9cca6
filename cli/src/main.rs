use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;
pub mod ux_error;

use commands::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen(args) => commands::keygen::run(&args),
        Commands::Seal(args) => commands::seal::run(args),
        Commands::Classify(args) => commands::classify::run(args),
        Commands::Config(args) => commands::settings::run(&args),
        Commands::Completion(args) => commands::completion::run(&args),
    }
}
