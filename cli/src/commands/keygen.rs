use anyhow::Result;
use clap::Args;
use storage::SecretCipher;

use crate::output;

#[derive(Args)]
pub struct KeygenArgs {
    #[arg(long, help = "Print only the key")]
    pub quiet: bool,
}

pub fn run(args: &KeygenArgs) -> Result<()> {
    let key = SecretCipher::generate_key();
    if args.quiet {
        println!("{key}");
        return Ok(());
    }

    output::header("Security key");
    println!("{key}");
    println!();
    output::hint("export BROKER_SECURITY_KEY=<key> before starting the broker");
    output::warn("Credentials sealed with another key cannot be opened with this one");
    Ok(())
}
