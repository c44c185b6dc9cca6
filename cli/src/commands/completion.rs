use std::io;

use anyhow::Result;
use clap::{Args, CommandFactory, ValueEnum};
use clap_complete::{Shell, generate};

use super::Cli;

#[derive(Args)]
pub struct CompletionArgs {
    #[arg(help = "Shell to generate completions for")]
    pub shell: ShellChoice,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ShellChoice {
    Bash,
    Zsh,
    Fish,
}

pub fn run(args: &CompletionArgs) -> Result<()> {
    let shell = match args.shell {
        ShellChoice::Bash => Shell::Bash,
        ShellChoice::Zsh => Shell::Zsh,
        ShellChoice::Fish => Shell::Fish,
    };
    generate(shell, &mut Cli::command(), "brokerctl", &mut io::stdout());
    Ok(())
}
