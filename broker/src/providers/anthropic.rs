//! Anthropic Messages API (`/v1/messages`).

use super::sse::{SseEvent, for_each_event};
use super::{invalid_response, send_request};
use async_trait::async_trait;
use broker_core::{Provider, ProviderCall, ProviderKind, ProviderResponse, Role, TokenSink};
use errors::ProviderError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// The Messages API requires an explicit output cap.
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    version: String,
    idle_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartedMessage,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Usage,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartedMessage {
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

impl AnthropicProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        version: &str,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            version: version.to_string(),
            idle_timeout,
        }
    }

    fn endpoint(&self, call: &ProviderCall) -> String {
        let base = call
            .api_base
            .as_deref()
            .map_or(self.base_url.as_str(), |b| b.trim_end_matches('/'));
        format!("{base}/v1/messages")
    }

    /// System-role messages are folded into the top-level `system` field;
    /// the API only accepts user and assistant turns in `messages`.
    fn body(call: &ProviderCall) -> Value {
        let mut system: Vec<&str> = call.prompt.system.iter().map(String::as_str).collect();
        let mut messages = Vec::with_capacity(call.prompt.messages.len());
        for message in &call.prompt.messages {
            match message.role {
                Role::System => system.push(&message.content),
                Role::User | Role::Assistant => messages.push(
                    json!({ "role": message.role.to_string(), "content": message.content }),
                ),
            }
        }

        let mut body = json!({
            "model": call.model,
            "max_tokens": call.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
            "stream": call.streaming,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(temperature) = call.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn send(&self, call: &ProviderCall) -> Result<reqwest::Response, ProviderError> {
        let request = self
            .client
            .post(self.endpoint(call))
            .header("x-api-key", call.api_key.expose())
            .header("anthropic-version", &self.version)
            .json(&Self::body(call));
        send_request(request, call.streaming.then_some(self.idle_timeout)).await
    }

    async fn complete(&self, call: &ProviderCall) -> Result<ProviderResponse, ProviderError> {
        let message: MessageResponse = self
            .send(call)
            .await?
            .json()
            .await
            .map_err(|e| invalid_response(e.to_string()))?;

        check_stop(message.stop_reason.as_deref(), &call.model)?;
        let text = message
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<String>();

        Ok(ProviderResponse {
            text,
            prompt_tokens: message.usage.input_tokens,
            completion_tokens: message.usage.output_tokens,
        })
    }

    async fn stream(
        &self,
        call: &ProviderCall,
        sink: Option<&TokenSink>,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self.send(call).await?;
        let mut text = String::new();
        let mut usage = Usage::default();

        for_each_event(response, self.idle_timeout, |event: SseEvent| {
            let parsed: StreamEvent = serde_json::from_str(&event.data)
                .map_err(|e| invalid_response(format!("bad stream event: {e}")))?;
            match parsed {
                StreamEvent::MessageStart { message } => {
                    usage.input_tokens = message.usage.input_tokens;
                }
                StreamEvent::ContentBlockDelta { delta } => {
                    if let Some(token) = delta.text {
                        if let Some(sink) = sink {
                            sink.push(&token);
                        }
                        text.push_str(&token);
                    }
                }
                StreamEvent::MessageDelta {
                    delta,
                    usage: delta_usage,
                } => {
                    usage.output_tokens = delta_usage.output_tokens;
                    check_stop(delta.stop_reason.as_deref(), &call.model)?;
                }
                StreamEvent::MessageStop => return Ok(false),
                StreamEvent::Error { error } => {
                    return Err(ProviderError::status(
                        status_for_error_type(&error.kind),
                        json!({ "error": { "type": error.kind, "message": error.message } })
                            .to_string(),
                    ));
                }
                StreamEvent::Other => {}
            }
            Ok(true)
        })
        .await?;

        Ok(ProviderResponse {
            text,
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
        })
    }
}

fn check_stop(reason: Option<&str>, model: &str) -> Result<(), ProviderError> {
    match reason {
        Some("max_tokens") => Err(ProviderError::LengthLimited {
            model: model.to_string(),
        }),
        Some("refusal") => Err(ProviderError::ContentFiltered {
            model: model.to_string(),
        }),
        _ => Ok(()),
    }
}

/// HTTP status the API would have used for an error delivered mid-stream.
fn status_for_error_type(kind: &str) -> u16 {
    match kind {
        "invalid_request_error" => 400,
        "authentication_error" => 401,
        "permission_error" => 403,
        "not_found_error" => 404,
        "request_too_large" => 413,
        "rate_limit_error" => 429,
        "overloaded_error" => 529,
        _ => 500,
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn submit(
        &self,
        call: &ProviderCall,
        sink: Option<&TokenSink>,
    ) -> Result<ProviderResponse, ProviderError> {
        tracing::debug!(model = %call.model, streaming = call.streaming, "Submitting Anthropic message");
        if call.streaming {
            self.stream(call, sink).await
        } else {
            self.complete(call).await
        }
    }
}
