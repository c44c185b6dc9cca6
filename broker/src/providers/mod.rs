//! Upstream model providers.
//!
//! Every provider sits behind the single [`Provider`] capability. Failures
//! are returned as raw [`ProviderError`]s; nothing here decides what they
//! mean.

pub mod anthropic;
pub mod openai;
pub mod scripted;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiCompatibleProvider;
pub use scripted::{RecordedCall, ScriptedProvider, ScriptedReply};

use broker_core::{Provider, ProviderKind};
use config::ProvidersConfig;
use errors::{BrokerError, ProviderError};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on how much of an error body is kept.
const MAX_ERROR_BODY_BYTES: usize = 16 * 1024;

/// Providers available to the broker, one per kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the HTTP providers for every supported upstream.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, BrokerError> {
        let client = http_client(config)?;
        let idle = Duration::from_secs(config.stream_idle_timeout_seconds);

        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiCompatibleProvider::new(
            ProviderKind::OpenAi,
            client.clone(),
            &config.openai_base_url,
            idle,
        )));
        registry.register(Arc::new(OpenAiCompatibleProvider::new(
            ProviderKind::OpenRouter,
            client.clone(),
            &config.openrouter_base_url,
            idle,
        )));
        registry.register(Arc::new(AnthropicProvider::new(
            client,
            &config.anthropic_base_url,
            &config.anthropic_version,
            idle,
        )));
        Ok(registry)
    }

    /// Replaces any provider already registered for the same kind.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, BrokerError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| BrokerError::ProviderUnavailable {
                provider: kind.to_string(),
            })
    }
}

fn http_client(config: &ProvidersConfig) -> Result<reqwest::Client, BrokerError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.request_timeout_seconds.min(30)))
        .build()
        .map_err(|e| BrokerError::configuration(format!("failed to build HTTP client: {e}")))
}

pub(crate) fn map_transport_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout {
            message: e.to_string(),
        }
    } else if e.is_connect() || e.is_request() || e.is_body() {
        ProviderError::Connection {
            message: e.to_string(),
        }
    } else if e.is_decode() {
        ProviderError::InvalidResponse {
            message: e.to_string(),
        }
    } else {
        ProviderError::other(e.to_string())
    }
}

/// Sends a prepared request. Streaming calls must see response headers
/// within `first_byte`; blocking calls are bounded by the invoker instead.
pub(crate) async fn send_request(
    request: reqwest::RequestBuilder,
    first_byte: Option<Duration>,
) -> Result<reqwest::Response, ProviderError> {
    let pending = request.send();
    let sent = match first_byte {
        Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .map_err(|_| ProviderError::Timeout {
                message: format!("no response headers within {}s", limit.as_secs()),
            })?,
        None => pending.await,
    };
    let response = sent.map_err(|e| map_transport_error(&e))?;

    if !response.status().is_success() {
        return Err(status_error(response).await);
    }
    Ok(response)
}

/// Turns a non-success response into a status error, reading at most
/// `MAX_ERROR_BODY_BYTES` of the body.
pub(crate) async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = match read_capped(response, MAX_ERROR_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => format!("<unreadable body: {e}>"),
    };
    ProviderError::status(status, body)
}

async fn read_capped(response: reqwest::Response, max_bytes: usize) -> Result<String, reqwest::Error> {
    let mut stream = response.bytes_stream();
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let room = max_bytes - bytes.len();
        bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if bytes.len() >= max_bytes {
            break;
        }
    }
    Ok(cap(String::from_utf8_lossy(&bytes).into_owned(), max_bytes))
}

fn cap(mut body: String, max_bytes: usize) -> String {
    if body.len() > max_bytes {
        let mut end = max_bytes;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// Rough token count used only when an upstream omits usage.
pub(crate) fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

pub(crate) fn invalid_response(message: impl Into<String>) -> ProviderError {
    ProviderError::InvalidResponse {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_config_covers_every_kind() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig::default()).unwrap();
        for kind in [
            ProviderKind::OpenAi,
            ProviderKind::OpenRouter,
            ProviderKind::Anthropic,
        ] {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_missing_provider_is_unavailable() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.get(ProviderKind::Anthropic),
            Err(BrokerError::ProviderUnavailable { .. })
        ));
    }

    #[test]
    fn test_cap_respects_char_boundaries() {
        assert_eq!(cap("ééé".to_string(), 3), "é");
        assert_eq!(cap("short".to_string(), 100), "short");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
