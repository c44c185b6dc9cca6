//! OpenAI-compatible chat completions (`/chat/completions`).
//!
//! Serves both OpenAI and OpenRouter; they differ only in base URL.

use super::sse::{SseEvent, for_each_event};
use super::{estimate_tokens, invalid_response, send_request};
use async_trait::async_trait;
use broker_core::{Provider, ProviderCall, ProviderKind, ProviderResponse, TokenSink};
use errors::ProviderError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

pub struct OpenAiCompatibleProvider {
    kind: ProviderKind,
    client: reqwest::Client,
    base_url: String,
    idle_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<Content>,
    #[serde(default)]
    delta: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        kind: ProviderKind,
        client: reqwest::Client,
        base_url: &str,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            kind,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            idle_timeout,
        }
    }

    fn endpoint(&self, call: &ProviderCall) -> String {
        let base = call
            .api_base
            .as_deref()
            .map_or(self.base_url.as_str(), |b| b.trim_end_matches('/'));
        format!("{base}/chat/completions")
    }

    fn body(call: &ProviderCall) -> Value {
        let mut messages = Vec::with_capacity(call.prompt.messages.len() + 1);
        if let Some(system) = &call.prompt.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for message in &call.prompt.messages {
            messages.push(json!({ "role": message.role.to_string(), "content": message.content }));
        }

        let mut body = json!({
            "model": call.model,
            "messages": messages,
            "stream": call.streaming,
        });
        if let Some(temperature) = call.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = call.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if call.streaming {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, call: &ProviderCall) -> Result<reqwest::Response, ProviderError> {
        let request = self
            .client
            .post(self.endpoint(call))
            .bearer_auth(call.api_key.expose())
            .json(&Self::body(call));
        send_request(request, call.streaming.then_some(self.idle_timeout)).await
    }

    async fn complete(&self, call: &ProviderCall) -> Result<ProviderResponse, ProviderError> {
        let completion: ChatCompletion = self
            .send(call)
            .await?
            .json()
            .await
            .map_err(|e| invalid_response(e.to_string()))?;

        if let Some(error) = completion.error {
            return Err(ProviderError::other(error.to_string()));
        }
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response("response carried no choices"))?;
        check_finish(choice.finish_reason.as_deref(), &call.model)?;

        let text = choice.message.and_then(|m| m.content).unwrap_or_default();
        let usage = completion.usage.unwrap_or_else(|| estimated_usage(call, &text));
        Ok(ProviderResponse {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }

    async fn stream(
        &self,
        call: &ProviderCall,
        sink: Option<&TokenSink>,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self.send(call).await?;
        let mut text = String::new();
        let mut usage = None;

        for_each_event(response, self.idle_timeout, |event: SseEvent| {
            if event.data == "[DONE]" {
                return Ok(false);
            }
            let chunk: ChatCompletion = serde_json::from_str(&event.data)
                .map_err(|e| invalid_response(format!("bad stream chunk: {e}")))?;
            if let Some(error) = chunk.error {
                return Err(ProviderError::other(error.to_string()));
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            for choice in chunk.choices {
                if let Some(token) = choice.delta.and_then(|d| d.content) {
                    if let Some(sink) = sink {
                        sink.push(&token);
                    }
                    text.push_str(&token);
                }
                check_finish(choice.finish_reason.as_deref(), &call.model)?;
            }
            Ok(true)
        })
        .await?;

        let usage = usage.unwrap_or_else(|| estimated_usage(call, &text));
        Ok(ProviderResponse {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

fn check_finish(reason: Option<&str>, model: &str) -> Result<(), ProviderError> {
    match reason {
        Some("length") => Err(ProviderError::LengthLimited {
            model: model.to_string(),
        }),
        Some("content_filter") => Err(ProviderError::ContentFiltered {
            model: model.to_string(),
        }),
        _ => Ok(()),
    }
}

fn estimated_usage(call: &ProviderCall, text: &str) -> Usage {
    let prompt: u64 = call
        .prompt
        .system
        .iter()
        .map(|s| estimate_tokens(s))
        .chain(call.prompt.messages.iter().map(|m| estimate_tokens(&m.content)))
        .sum();
    Usage {
        prompt_tokens: prompt,
        completion_tokens: estimate_tokens(text),
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn submit(
        &self,
        call: &ProviderCall,
        sink: Option<&TokenSink>,
    ) -> Result<ProviderResponse, ProviderError> {
        tracing::debug!(provider = %self.kind, model = %call.model, streaming = call.streaming, "Submitting chat completion");
        if call.streaming {
            self.stream(call, sink).await
        } else {
            self.complete(call).await
        }
    }
}
