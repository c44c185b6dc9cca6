use broker_core::ErrorKind;
use config::FallbackConfig;
use std::collections::HashMap;

/// Title persisted when a title call fails or returns nothing.
pub const DEFAULT_TITLE: &str = "New Chat";

const DEFAULT_CONTENT: &str =
    "Something went wrong while generating a response. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackText {
    pub title: String,
    pub content: String,
}

impl FallbackText {
    fn new(title: &str, content: &str) -> Self {
        Self {
            title: title.to_string(),
            content: content.to_string(),
        }
    }
}

/// Canned title and content per [`ErrorKind`].
///
/// Total: every kind resolves to a non-empty text, with `Unknown` doubling
/// as the default arm.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    texts: HashMap<ErrorKind, FallbackText>,
    default: FallbackText,
}

impl FallbackPolicy {
    pub fn new() -> Self {
        let texts = ErrorKind::ALL
            .iter()
            .map(|kind| (*kind, builtin(*kind)))
            .collect();
        Self {
            texts,
            default: builtin(ErrorKind::Unknown),
        }
    }

    /// Built-in texts with configured overrides applied. Override keys were
    /// validated with the configuration; unparseable ones are skipped.
    pub fn from_config(config: &FallbackConfig) -> Self {
        let mut policy = Self::new();
        for (key, text) in &config.overrides {
            match key.parse::<ErrorKind>() {
                Ok(kind) => {
                    let text = FallbackText::new(&text.title, &text.content);
                    if kind == ErrorKind::Unknown {
                        policy.default = text.clone();
                    }
                    policy.texts.insert(kind, text);
                }
                Err(_) => {
                    tracing::warn!(kind = %key, "Ignoring fallback override for unknown error kind");
                }
            }
        }
        policy
    }

    pub fn text_for(&self, kind: ErrorKind) -> &FallbackText {
        self.texts.get(&kind).unwrap_or(&self.default)
    }

    pub fn title_for(&self, kind: ErrorKind) -> &str {
        &self.text_for(kind).title
    }

    pub fn content_for(&self, kind: ErrorKind) -> &str {
        &self.text_for(kind).content
    }

    pub fn default_title(&self) -> &str {
        DEFAULT_TITLE
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin(kind: ErrorKind) -> FallbackText {
    match kind {
        ErrorKind::NotFound => FallbackText::new(
            "Model unavailable",
            "The selected model is no longer available for your workspace. Please choose another model or update your API key.",
        ),
        ErrorKind::RateLimited => FallbackText::new(
            "Rate limit reached",
            "The model provider is receiving too many requests right now. Please try again in a moment.",
        ),
        ErrorKind::Timeout => FallbackText::new(
            "Request timed out",
            "The model took too long to respond. Please try again.",
        ),
        ErrorKind::ConnectionFailed => FallbackText::new(
            "Connection problem",
            "We couldn't reach the model provider. Please check your connection and try again.",
        ),
        ErrorKind::UpstreamStatusError => FallbackText::new(
            "Provider error",
            "The model provider returned an error. Please try again later.",
        ),
        ErrorKind::OutputTruncated => FallbackText::new(
            "Response too long",
            "The response exceeded the model's output limit. Try asking for a shorter answer.",
        ),
        ErrorKind::ContentFiltered => FallbackText::new(
            "Content filtered",
            "The response was blocked by the provider's content filter. Try rephrasing your message.",
        ),
        ErrorKind::DecryptionError => FallbackText::new(
            "API key problem",
            "Your saved API key could not be read. Please re-enter it in settings.",
        ),
        ErrorKind::NoUsableCredential => FallbackText::new(
            "No API key configured",
            "No usable API key is configured for this provider. Please add one in settings.",
        ),
        ErrorKind::Unknown => FallbackText::new(DEFAULT_TITLE, DEFAULT_CONTENT),
    }
}
