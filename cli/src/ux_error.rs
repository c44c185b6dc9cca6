use colored::Colorize;

#[derive(Debug)]
pub struct UxError {
    pub what: String,
    pub why: Option<String>,
    pub how_to_fix: Vec<String>,
    pub suggested_command: Option<String>,
}

impl UxError {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            why: None,
            how_to_fix: Vec::new(),
            suggested_command: None,
        }
    }

    pub fn why(mut self, reason: impl Into<String>) -> Self {
        self.why = Some(reason.into());
        self
    }

    pub fn fix(mut self, suggestion: impl Into<String>) -> Self {
        self.how_to_fix.push(suggestion.into());
        self
    }

    pub fn suggest(mut self, cmd: impl Into<String>) -> Self {
        self.suggested_command = Some(cmd.into());
        self
    }

    pub fn display(&self) {
        eprintln!();
        eprintln!("{} {}", "error:".red().bold(), self.what.white().bold());

        if let Some(why) = &self.why {
            eprintln!("       {}", why.dimmed());
        }

        if !self.how_to_fix.is_empty() {
            eprintln!();
            eprintln!("{}", "How to fix:".yellow().bold());
            for (i, fix) in self.how_to_fix.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, fix);
            }
        }

        if let Some(cmd) = &self.suggested_command {
            eprintln!();
            eprintln!("{}", "Try this:".green().bold());
            eprintln!("  $ {}", cmd.cyan());
        }
        eprintln!();
    }
}

impl std::fmt::Display for UxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.what)
    }
}

impl std::error::Error for UxError {}

pub fn missing_security_key() -> UxError {
    UxError::new("No security key configured")
        .why("Credentials are sealed with the process-wide key")
        .fix("Set BROKER_SECURITY_KEY (or SECURITY_KEY) in the environment")
        .fix("Or set secrets.security_key in the --config file")
        .suggest("brokerctl keygen")
}

pub fn invalid_security_key(reason: &str) -> UxError {
    UxError::new("Security key is not usable")
        .why(reason.to_string())
        .fix("Use base64 of 32 random bytes, or a raw 32-byte string")
        .suggest("brokerctl keygen")
}

pub fn unknown_provider(provider: &str) -> UxError {
    UxError::new(format!("Unknown provider: '{provider}'"))
        .why("Credential records name one of the supported upstreams")
        .fix("Use one of: OPEN_AI, OPEN_ROUTER, ANTHROPIC")
}

pub fn config_error(message: &str) -> UxError {
    UxError::new(format!("Configuration error: {message}"))
        .why("The configuration file or BROKER_* environment is invalid")
        .fix("Check the file passed with --config")
        .fix("Check BROKER_* environment variables")
        .suggest("brokerctl config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_fixes() {
        let err = UxError::new("boom").why("because").fix("a").fix("b").suggest("cmd");
        assert_eq!(err.how_to_fix, vec!["a", "b"]);
        assert_eq!(err.suggested_command.as_deref(), Some("cmd"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_missing_key_suggests_keygen() {
        let err = missing_security_key();
        assert_eq!(err.suggested_command.as_deref(), Some("brokerctl keygen"));
    }
}
