use anyhow::{Result, bail};
use broker::classifier::{self, Classification};
use clap::{Args, ValueEnum};
use colored::Colorize;
use errors::ProviderError;

use crate::output;

#[derive(Args)]
pub struct ClassifyArgs {
    #[arg(long, help = "HTTP status returned by the upstream")]
    pub status: Option<u16>,

    #[arg(long, default_value = "", help = "Raw upstream body or error message")]
    pub body: String,

    #[arg(long, value_enum, conflicts_with = "status", help = "Transport-level failure instead of a status")]
    pub transport: Option<Transport>,

    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Transport {
    Timeout,
    Connection,
}

pub fn run(args: ClassifyArgs) -> Result<()> {
    let error = provider_error(&args)?;
    let classification = classifier::classify(&error);

    if args.json {
        let doc = serde_json::json!({
            "classification": classification,
            "known": classification.is_known(),
            "deprecates_credential": classification.deprecates_credential(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    print_human(&classification);
    Ok(())
}

fn provider_error(args: &ClassifyArgs) -> Result<ProviderError> {
    let body = args.body.clone();
    Ok(match (args.status, args.transport) {
        (Some(status), _) => ProviderError::Status { status, body },
        (None, Some(Transport::Timeout)) => ProviderError::Timeout { message: body },
        (None, Some(Transport::Connection)) => ProviderError::Connection { message: body },
        (None, None) if body.is_empty() => bail!("Provide --status, --transport or --body"),
        (None, None) => ProviderError::Other { message: body },
    })
}

fn print_human(classification: &Classification) {
    output::header("Classification");
    println!("  kind:        {}", classification.kind.to_string().bold());
    println!("  error_code:  {}", classification.error_code);
    println!(
        "  upstream:    {}",
        classification.upstream_code.as_deref().unwrap_or("-")
    );
    println!("  message:     {}", classification.message);
    println!();
    if classification.deprecates_credential() {
        output::warn("The credential would be marked deprecated");
    }
    if !classification.is_known() {
        output::hint("Unrecognised upstream code: the broker logs this as a new error code");
    }
}
