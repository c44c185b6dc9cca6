//! In-process provider that plays back a fixed script of replies.
//!
//! Used by the broker's own tests and by embedders that want to exercise the
//! lifecycle without an upstream. Every call is recorded so assertions can
//! inspect what the broker sent.

use async_trait::async_trait;
use broker_core::{Provider, ProviderCall, ProviderKind, ProviderResponse, TokenSink};
use errors::ProviderError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text {
        text: String,
        prompt_tokens: u64,
        completion_tokens: u64,
    },
    /// Tokens are pushed to the sink one by one; usage is reported at the end.
    Stream {
        tokens: Vec<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
    },
    Error(ProviderError),
    /// Sleeps before producing the wrapped reply.
    Delay(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self::Text {
            text: text.into(),
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn stream<I, S>(tokens: I, prompt_tokens: u64, completion_tokens: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream {
            tokens: tokens.into_iter().map(Into::into).collect(),
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn error(error: ProviderError) -> Self {
        Self::Error(error)
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delay(delay, Box::new(self))
    }
}

/// What the broker handed to the provider, minus the secret itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub streaming: bool,
    pub key_fingerprint: String,
    pub message_count: usize,
}

pub struct ScriptedProvider {
    kind: ProviderKind,
    script: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies(kind: ProviderKind, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        let provider = Self::new(kind);
        provider.script.lock().extend(replies);
        provider
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.script.lock().push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn submit(
        &self,
        call: &ProviderCall,
        sink: Option<&TokenSink>,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.lock().push(RecordedCall {
            model: call.model.clone(),
            max_tokens: call.max_tokens,
            temperature: call.temperature,
            streaming: call.streaming,
            key_fingerprint: utils::fingerprint(call.api_key.expose()),
            message_count: call.prompt.messages.len(),
        });

        let mut reply = self
            .script
            .lock()
            .pop_front()
            .ok_or_else(|| ProviderError::other("scripted provider has no replies left"))?;

        loop {
            match reply {
                ScriptedReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
                ScriptedReply::Text {
                    text,
                    prompt_tokens,
                    completion_tokens,
                } => {
                    if call.streaming {
                        if let Some(sink) = sink {
                            sink.push(&text);
                        }
                    }
                    return Ok(ProviderResponse {
                        text,
                        prompt_tokens,
                        completion_tokens,
                    });
                }
                ScriptedReply::Stream {
                    tokens,
                    prompt_tokens,
                    completion_tokens,
                } => {
                    if let Some(sink) = sink {
                        for token in &tokens {
                            sink.push(token);
                        }
                    }
                    return Ok(ProviderResponse {
                        text: tokens.concat(),
                        prompt_tokens,
                        completion_tokens,
                    });
                }
                ScriptedReply::Error(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::{PromptPayload, SecretString};

    fn call(streaming: bool) -> ProviderCall {
        ProviderCall {
            model: "gpt-4o-mini".to_string(),
            api_key: SecretString::new("sk-test".to_string()),
            api_base: None,
            prompt: PromptPayload::from_user("hi"),
            temperature: None,
            max_tokens: Some(35),
            streaming,
        }
    }

    #[tokio::test]
    async fn test_replies_play_in_order_then_run_out() {
        let provider = ScriptedProvider::with_replies(
            ProviderKind::OpenAi,
            [
                ScriptedReply::text("first", 3, 1),
                ScriptedReply::error(ProviderError::status(429, "slow down")),
            ],
        );

        assert_eq!(provider.submit(&call(false), None).await.unwrap().text, "first");
        assert!(matches!(
            provider.submit(&call(false), None).await,
            Err(ProviderError::Status { status: 429, .. })
        ));
        assert!(matches!(
            provider.submit(&call(false), None).await,
            Err(ProviderError::Other { .. })
        ));
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_pushes_tokens_to_sink() {
        let provider = ScriptedProvider::with_replies(
            ProviderKind::OpenAi,
            [ScriptedReply::stream(["Hel", "lo"], 4, 2)],
        );
        let sink = TokenSink::new(None);

        let response = provider.submit(&call(true), Some(&sink)).await.unwrap();
        assert_eq!(response.text, "Hello");
        assert!(sink.is_active());
        assert_eq!(sink.received(), 2);
    }

    #[tokio::test]
    async fn test_recorded_call_hides_secret() {
        let provider =
            ScriptedProvider::with_replies(ProviderKind::OpenAi, [ScriptedReply::text("ok", 1, 1)]);
        provider.submit(&call(false), None).await.unwrap();

        let recorded = &provider.calls()[0];
        assert_eq!(recorded.key_fingerprint, utils::fingerprint("sk-test"));
        assert_ne!(recorded.key_fingerprint, "sk-test");
        assert_eq!(recorded.max_tokens, Some(35));
    }
}
