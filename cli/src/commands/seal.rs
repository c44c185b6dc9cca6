use anyhow::{Context, Result, bail};
use broker_core::{CredentialId, CredentialRecord, ProviderKind, TenantId};
use clap::Args;
use std::collections::HashMap;
use std::io::Read;
use storage::SecretCipher;

use super::ConfigSource;
use crate::{output, ux_error};

#[derive(Args)]
pub struct SealArgs {
    #[command(flatten)]
    pub source: ConfigSource,

    #[arg(long, help = "Plaintext API key (read from stdin when omitted)")]
    pub secret: Option<String>,

    #[arg(
        long,
        requires_all = ["provider", "model"],
        help = "Emit a complete credential record for this tenant"
    )]
    pub tenant: Option<String>,

    #[arg(long, help = "Provider code: OPEN_AI, OPEN_ROUTER or ANTHROPIC")]
    pub provider: Option<String>,

    #[arg(long, help = "Model name the credential is bound to")]
    pub model: Option<String>,

    #[arg(long, help = "Credential id (generated when omitted)")]
    pub id: Option<String>,

    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

pub fn run(args: SealArgs) -> Result<()> {
    let config = args.source.load()?;
    let cipher = SecretCipher::from_config(&config.secrets).map_err(|e| {
        let err = if config.secrets.security_key.is_none() {
            ux_error::missing_security_key()
        } else {
            ux_error::invalid_security_key(&e.to_string())
        };
        err.display();
        anyhow::Error::new(err)
    })?;

    let secret = match args.secret {
        Some(secret) => secret,
        None => read_stdin()?,
    };
    let secret = secret.trim();
    if secret.is_empty() {
        bail!("Refusing to seal an empty secret");
    }

    let sealed = cipher.seal(secret).context("Failed to seal secret")?;
    tracing::debug!(fingerprint = %utils::fingerprint(secret), "Secret sealed");

    let Some(tenant) = args.tenant else {
        if args.json {
            let doc = serde_json::json!({
                "encrypted_secret": sealed,
                "fingerprint": utils::fingerprint(secret),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        } else {
            println!("{sealed}");
        }
        return Ok(());
    };

    let record = credential_record(
        &tenant,
        args.provider.as_deref().unwrap_or_default(),
        args.model.unwrap_or_default(),
        args.id,
        sealed,
    )?;
    if !args.json {
        output::info(&format!(
            "Sealed credential {} for tenant {} ({})",
            record.id, record.tenant_id, record.provider
        ));
    }
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn credential_record(
    tenant: &str,
    provider: &str,
    model: String,
    id: Option<String>,
    sealed: String,
) -> Result<CredentialRecord> {
    let tenant_id = TenantId::new(tenant.to_string()).context("Tenant id must not be empty")?;
    let provider: ProviderKind = provider.parse().map_err(|_| {
        let err = ux_error::unknown_provider(provider);
        err.display();
        anyhow::Error::new(err)
    })?;
    if model.trim().is_empty() {
        bail!("Model name must not be empty");
    }
    let id = CredentialId::new(id.unwrap_or_else(utils::generate_uuid))
        .context("Credential id must not be empty")?;

    Ok(CredentialRecord {
        id,
        tenant_id,
        provider,
        model_name: model,
        encrypted_secret: sealed,
        is_deprecated: false,
        extra_config: HashMap::new(),
    })
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read secret from stdin")?;
    Ok(buf)
}
