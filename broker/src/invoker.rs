//! Provider Invoker.
//!
//! Executes one model call against an already selected and opened
//! credential. Failures come back as the provider reported them; this module
//! does not interpret them.

use crate::pricing::Pricing;
use crate::providers::ProviderRegistry;
use crate::telemetry::{InvocationTimer, Telemetry};
use broker_core::{
    Completion, CredentialRecord, FunctionalityClass, InvocationRequest, Provider, ProviderCall,
    SecretString, TokenSink,
};
use config::LifecycleConfig;
use errors::{BrokerError, ProviderError};
use std::sync::Arc;
use std::time::Duration;

/// Output caps per functionality. Chat uses whatever the credential
/// configures.
#[derive(Debug, Clone, Copy)]
pub struct TokenLimits {
    pub title: u32,
    pub summary: u32,
    pub instructions: u32,
}

impl TokenLimits {
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            title: config.title_max_tokens,
            summary: config.compaction_max_tokens,
            instructions: config.instructions_max_tokens,
        }
    }

    fn for_call(&self, functionality: FunctionalityClass, configured: Option<u32>) -> Option<u32> {
        match functionality {
            FunctionalityClass::Chat => configured,
            FunctionalityClass::Title => Some(self.title),
            FunctionalityClass::Summary => Some(self.summary),
            FunctionalityClass::Instructions => Some(self.instructions),
        }
    }
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self::from_config(&LifecycleConfig::default())
    }
}

pub struct ProviderInvoker {
    registry: ProviderRegistry,
    pricing: Pricing,
    limits: TokenLimits,
    request_timeout: Duration,
    telemetry: Telemetry,
}

impl ProviderInvoker {
    pub fn new(
        registry: ProviderRegistry,
        pricing: Pricing,
        limits: TokenLimits,
        request_timeout: Duration,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            registry,
            pricing,
            limits,
            request_timeout,
            telemetry,
        }
    }

    pub fn provider(&self, request: &InvocationRequest) -> Result<Arc<dyn Provider>, BrokerError> {
        self.registry.get(request.provider)
    }

    pub fn call_for(
        &self,
        request: &InvocationRequest,
        credential: &CredentialRecord,
        secret: &SecretString,
    ) -> ProviderCall {
        let settings = credential.settings();
        ProviderCall {
            model: model_for(request, credential).to_string(),
            api_key: secret.clone(),
            api_base: settings.api_base,
            prompt: request.prompt.clone(),
            temperature: settings.temperature,
            max_tokens: self
                .limits
                .for_call(request.functionality, settings.max_tokens),
            streaming: request.streaming,
        }
    }

    /// Runs one call. Blocking calls are bounded by the request timeout;
    /// streaming calls are bounded by the provider's idle timeout, both for
    /// the response headers and between chunks. A stream that never produced a token comes back as
    /// [`Completion::condensed`].
    pub async fn invoke(
        &self,
        provider: &dyn Provider,
        request: &InvocationRequest,
        credential: &CredentialRecord,
        secret: &SecretString,
        sink: Option<&TokenSink>,
    ) -> Result<Completion, ProviderError> {
        let call = self.call_for(request, credential, secret);
        let timer = InvocationTimer::new(self.telemetry, request.provider);

        let response = if call.streaming {
            provider.submit(&call, sink).await
        } else {
            tokio::time::timeout(self.request_timeout, provider.submit(&call, None))
                .await
                .map_err(|_| ProviderError::Timeout {
                    message: format!(
                        "no response from {} within {}s",
                        request.provider,
                        self.request_timeout.as_secs()
                    ),
                })?
        };
        timer.finish();
        let response = response?;

        if call.streaming && !sink.is_some_and(TokenSink::is_active) {
            return Ok(Completion::condensed());
        }

        self.telemetry.record_tokens(
            request.provider,
            response.prompt_tokens,
            response.completion_tokens,
        );
        let cost = self.pricing.cost(
            &call.model,
            response.prompt_tokens,
            response.completion_tokens,
        );
        Ok(Completion {
            text: response.text,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            cost,
            stream_active: call.streaming,
        })
    }
}

pub fn model_for<'a>(request: &'a InvocationRequest, credential: &'a CredentialRecord) -> &'a str {
    request
        .model_name
        .as_deref()
        .unwrap_or(credential.model_name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedProvider, ScriptedReply};
    use broker_core::{CredentialId, PromptPayload, ProviderKind, TenantId, ThreadId};
    use std::collections::HashMap;

    fn credential() -> CredentialRecord {
        let mut extra_config = HashMap::new();
        extra_config.insert("max_tokens".to_string(), serde_json::json!(900));
        CredentialRecord {
            id: CredentialId::new("c1".to_string()).unwrap(),
            tenant_id: TenantId::new("acme".to_string()).unwrap(),
            provider: ProviderKind::OpenAi,
            model_name: "gpt-4o".to_string(),
            encrypted_secret: String::new(),
            is_deprecated: false,
            extra_config,
        }
    }

    fn request(functionality: FunctionalityClass) -> InvocationRequest {
        InvocationRequest::new(
            TenantId::new("acme".to_string()).unwrap(),
            ThreadId::new("t1".to_string()).unwrap(),
            ProviderKind::OpenAi,
            functionality,
            PromptPayload::from_user("hello"),
        )
    }

    fn invoker(timeout: Duration) -> ProviderInvoker {
        ProviderInvoker::new(
            ProviderRegistry::new(),
            Pricing::default(),
            TokenLimits::default(),
            timeout,
            Telemetry::new(false),
        )
    }

    fn secret() -> SecretString {
        SecretString::new("sk".to_string())
    }

    #[tokio::test]
    async fn test_blocking_call_is_costed() {
        let provider = ScriptedProvider::with_replies(
            ProviderKind::OpenAi,
            [ScriptedReply::text("Hi there", 1000, 1000)],
        );
        let completion = invoker(Duration::from_secs(5))
            .invoke(&provider, &request(FunctionalityClass::Chat), &credential(), &secret(), None)
            .await
            .unwrap();

        assert_eq!(completion.text, "Hi there");
        assert!((completion.cost - 0.0125).abs() < 1e-12);
        assert_eq!(provider.calls()[0].max_tokens, Some(900));
    }

    #[tokio::test]
    async fn test_title_uses_title_limit_and_model_override() {
        let provider =
            ScriptedProvider::with_replies(ProviderKind::OpenAi, [ScriptedReply::text("T", 1, 1)]);
        let request = request(FunctionalityClass::Title).with_model("gpt-4o-mini");
        invoker(Duration::from_secs(5))
            .invoke(&provider, &request, &credential(), &secret(), None)
            .await
            .unwrap();

        let call = &provider.calls()[0];
        assert_eq!(call.max_tokens, Some(35));
        assert_eq!(call.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_slow_blocking_call_times_out() {
        let provider = ScriptedProvider::with_replies(
            ProviderKind::OpenAi,
            [ScriptedReply::text("late", 1, 1).delayed(Duration::from_millis(200))],
        );
        let result = invoker(Duration::from_millis(20))
            .invoke(&provider, &request(FunctionalityClass::Chat), &credential(), &secret(), None)
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_silent_stream_is_condensed() {
        let provider = ScriptedProvider::with_replies(
            ProviderKind::OpenAi,
            [ScriptedReply::stream(Vec::<String>::new(), 12, 0)],
        );
        let sink = TokenSink::new(None);
        let request = request(FunctionalityClass::Chat).streaming(true);
        let completion = invoker(Duration::from_secs(5))
            .invoke(&provider, &request, &credential(), &secret(), Some(&sink))
            .await
            .unwrap();

        assert_eq!(completion, Completion::condensed());
    }
}
