//! Response Lifecycle Manager.
//!
//! Drives one invocation from credential resolution to durable state:
//!
//! ```text
//! ResolvingCredential -> Invoking -> Success | ClassifyingFailure -> Persisting -> Done
//! ```
//!
//! A single attempt is made. Provider failures become a fallback reply that
//! is persisted like a generated one; only configuration-class problems and
//! persistence failures reach the caller as `Err`.

use crate::classifier::{self, Classification};
use crate::compactor::MemoryCompactor;
use crate::fallback::FallbackPolicy;
use crate::instructions::InstructionReviser;
use crate::invoker::{ProviderInvoker, TokenLimits, model_for};
use crate::ledger::{Charge, UsageLedger};
use crate::pricing::Pricing;
use crate::providers::ProviderRegistry;
use crate::secrets::SecretStoreAdapter;
use crate::selector::{CredentialSelector, strategy_from_config};
use crate::sequencer::ThreadSequencer;
use crate::telemetry::Telemetry;
use broker_core::{
    Completion, ConversationRepository, CounterStore, CredentialRecord, CredentialStore,
    ErrorKind, Exchange, FunctionalityClass, InstructionStore, InvocationRequest, LedgerBucket,
    Provider, Role, SecretString, TenantAccounts, TokenSink,
};
use config::Config;
use errors::BrokerError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    ResolvingCredential,
    Invoking,
    Success,
    ClassifyingFailure,
    Persisting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyStatus {
    Generated,
    Fallback { kind: ErrorKind, error_code: String },
    /// Nothing came back and nothing was stored.
    NoOp,
    /// An empty title was replaced by the default title.
    Defaulted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationReply {
    pub content: String,
    pub status: ReplyStatus,
    pub states: Vec<LifecycleState>,
}

impl InvocationReply {
    pub fn is_fallback(&self) -> bool {
        matches!(self.status, ReplyStatus::Fallback { .. })
    }
}

/// Heavy objects held for exactly one invocation: the provider handle, the
/// request with its prompt, the opened secret and the answer being
/// persisted. All of it goes when the scope drops, on every exit path.
pub struct InvocationScope {
    provider: Arc<dyn Provider>,
    request: InvocationRequest,
    secret: SecretString,
    prior_answer: Option<String>,
}

impl InvocationScope {
    pub fn new(provider: Arc<dyn Provider>, request: InvocationRequest, secret: SecretString) -> Self {
        Self {
            provider,
            request,
            secret,
            prior_answer: None,
        }
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn request(&self) -> &InvocationRequest {
        &self.request
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub fn hold_answer(&mut self, answer: &str) {
        self.prior_answer = Some(answer.to_string());
    }
}

impl Drop for InvocationScope {
    fn drop(&mut self) {
        tracing::debug!(
            thread_id = %self.request.thread_id,
            provider = %self.request.provider,
            held_answer_bytes = self.prior_answer.as_ref().map_or(0, String::len),
            "Invocation scope released"
        );
    }
}

/// External collaborators the manager reaches through their traits.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialStore>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub accounts: Arc<dyn TenantAccounts>,
    pub counters: Arc<dyn CounterStore>,
}

struct Inner {
    secrets: SecretStoreAdapter,
    selector: CredentialSelector,
    invoker: ProviderInvoker,
    fallback: FallbackPolicy,
    ledger: UsageLedger,
    compactor: MemoryCompactor,
    reviser: Option<InstructionReviser>,
    conversations: Arc<dyn ConversationRepository>,
    sequencer: Arc<ThreadSequencer>,
    telemetry: Telemetry,
    message_credit: f64,
    revise_instructions: bool,
    recent_exchange_limit: usize,
}

#[derive(Clone)]
pub struct ResponseLifecycleManager {
    inner: Arc<Inner>,
}

impl ResponseLifecycleManager {
    /// Fails with `ConfigurationError` when the process key is missing.
    pub fn new(
        config: &Config,
        collaborators: Collaborators,
        registry: ProviderRegistry,
    ) -> Result<Self, BrokerError> {
        let telemetry = Telemetry::new(config.observability.metrics_enabled);
        let secrets =
            SecretStoreAdapter::from_config(collaborators.credentials.clone(), &config.secrets)?;
        let selector = CredentialSelector::new(
            collaborators.credentials,
            collaborators.counters,
            strategy_from_config(&config.selection),
            telemetry,
        );
        let invoker = ProviderInvoker::new(
            registry,
            Pricing::new(config.pricing.clone()),
            TokenLimits::from_config(&config.lifecycle),
            Duration::from_secs(config.providers.request_timeout_seconds),
            telemetry,
        );

        tracing::info!(
            strategy = selector.strategy_name(),
            compaction_threshold = config.lifecycle.compaction_threshold,
            "Response lifecycle manager ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                secrets,
                selector,
                invoker,
                fallback: FallbackPolicy::from_config(&config.fallback),
                ledger: UsageLedger::new(
                    collaborators.conversations.clone(),
                    collaborators.accounts,
                ),
                compactor: MemoryCompactor::new(config.lifecycle.compaction_threshold),
                reviser: None,
                conversations: collaborators.conversations,
                sequencer: Arc::new(ThreadSequencer::new()),
                telemetry,
                message_credit: config.lifecycle.message_credit,
                revise_instructions: config.lifecycle.revise_instructions,
                recent_exchange_limit: config.lifecycle.recent_exchange_limit,
            }),
        })
    }

    /// Enables custom-instruction revision for requests carrying a brain id,
    /// unless revision is switched off in configuration. Only valid before
    /// the manager is shared.
    pub fn with_instructions(mut self, store: Arc<dyn InstructionStore>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            if inner.revise_instructions {
                inner.reviser = Some(InstructionReviser::new(store, inner.recent_exchange_limit));
            }
        } else {
            tracing::warn!("Instruction store ignored: manager already shared");
        }
        self
    }

    pub fn fallback_policy(&self) -> &FallbackPolicy {
        &self.inner.fallback
    }

    /// Runs one invocation on its own task. Dropping the returned future
    /// does not stop the task: a late provider result is still persisted.
    /// Tokens of a streaming call are forwarded on `tokens` as they arrive.
    pub async fn respond(
        &self,
        request: InvocationRequest,
        tokens: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<InvocationReply, BrokerError> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(request, tokens).await })
            .await
            .map_err(|e| BrokerError::Internal {
                reason: format!("invocation task failed: {e}"),
            })?
    }
}

impl Inner {
    async fn run(
        &self,
        request: InvocationRequest,
        tokens: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<InvocationReply, BrokerError> {
        let mut states = vec![LifecycleState::ResolvingCredential];

        let (credential, secret, provider) = match self.resolve(&request).await {
            Ok(resolved) => resolved,
            Err(error) => {
                self.reject(&request, &error);
                return Err(error);
            }
        };
        let mut scope = InvocationScope::new(provider, request, secret);
        let request = scope.request().clone();

        states.push(LifecycleState::Invoking);
        let sink = request.streaming.then(|| TokenSink::new(tokens));
        let result = self
            .invoker
            .invoke(
                scope.provider(),
                &request,
                &credential,
                scope.secret(),
                sink.as_ref(),
            )
            .await;

        let (content, status) = match result {
            Ok(completion) => {
                states.push(LifecycleState::Success);
                let defaults_title =
                    !request.streaming && request.functionality == FunctionalityClass::Title;
                if completion.is_empty() && !defaults_title {
                    tracing::info!(
                        tenant_id = %request.tenant_id,
                        thread_id = %request.thread_id,
                        streaming = request.streaming,
                        "response was condensed, no storage needed"
                    );
                    self.telemetry
                        .record_invocation(request.provider, request.functionality, "no_op");
                    states.push(LifecycleState::Done);
                    return Ok(InvocationReply {
                        content: String::new(),
                        status: ReplyStatus::NoOp,
                        states,
                    });
                }
                states.push(LifecycleState::Persisting);
                self.persist_success(&mut scope, &credential, completion)
                    .await?
            }
            Err(error) => {
                states.push(LifecycleState::ClassifyingFailure);
                let classification = classifier::classify(&error);
                classification.log(&request.tenant_id, &request.thread_id, request.provider);
                tracing::debug!(raw = %error.raw_message(), "Raw provider failure");
                self.telemetry
                    .record_failure(classification.kind, &classification.error_code);

                if classification.deprecates_credential() {
                    if let Err(e) = self.selector.mark_deprecated(&credential).await {
                        tracing::error!(
                            credential_id = %credential.id,
                            error = %e,
                            "Failed to mark credential deprecated"
                        );
                    }
                }

                states.push(LifecycleState::Persisting);
                self.persist_failure(&request, &classification).await?
            }
        };

        let outcome = match status {
            ReplyStatus::Generated => "generated",
            ReplyStatus::Fallback { .. } => "fallback",
            ReplyStatus::Defaulted => "defaulted",
            ReplyStatus::NoOp => "no_op",
        };
        self.telemetry
            .record_invocation(request.provider, request.functionality, outcome);
        states.push(LifecycleState::Done);
        Ok(InvocationReply {
            content,
            status,
            states,
        })
    }

    async fn resolve(
        &self,
        request: &InvocationRequest,
    ) -> Result<(CredentialRecord, SecretString, Arc<dyn Provider>), BrokerError> {
        let credential = self.selector.select_for(request).await?;
        let secret = self.secrets.open(&credential)?;
        let provider = self.invoker.provider(request)?;
        Ok((credential, secret, provider))
    }

    fn reject(&self, request: &InvocationRequest, error: &BrokerError) {
        let kind = classifier::rejection_kind(error);
        tracing::error!(
            tenant_id = %request.tenant_id,
            thread_id = %request.thread_id,
            provider = %request.provider,
            kind = %kind.map_or_else(String::new, |k| k.to_string()),
            code = error.code(),
            error = %error,
            "Invocation rejected"
        );
        self.telemetry
            .record_invocation(request.provider, request.functionality, "rejected");
    }

    async fn persist_success(
        &self,
        scope: &mut InvocationScope,
        credential: &CredentialRecord,
        completion: Completion,
    ) -> Result<(String, ReplyStatus), BrokerError> {
        let request = scope.request().clone();
        let thread_id = &request.thread_id;
        let _guard = self.sequencer.enter(thread_id).await;

        if completion.is_empty() {
            let title = self.fallback.default_title().to_string();
            self.conversations.set_title(thread_id, &title).await?;
            return Ok((title, ReplyStatus::Defaulted));
        }

        let text = completion.text.trim().to_string();
        scope.hold_answer(&text);
        match request.functionality {
            FunctionalityClass::Chat => {
                self.conversations
                    .append_turn(thread_id, Role::Assistant, &text)
                    .await?;
            }
            FunctionalityClass::Title => {
                self.conversations.set_title(thread_id, &text).await?;
            }
            FunctionalityClass::Summary | FunctionalityClass::Instructions => {}
        }
        self.ledger
            .merge(thread_id, LedgerBucket::Response, &completion.delta())
            .await?;
        self.record_usage(credential, request.functionality, &completion)
            .await;

        if request.functionality != FunctionalityClass::Chat {
            return Ok((text, ReplyStatus::Generated));
        }

        if let (Some(brain_id), Some(reviser)) = (request.brain_id.as_deref(), &self.reviser) {
            self.revise_instructions(reviser, brain_id, scope, credential, &text)
                .await;
        }

        // The turn and its ledger entry are committed; from here on a failed
        // write is logged and the stored reply is still returned.
        let credit = request.message_credit.unwrap_or(self.message_credit);
        match self
            .ledger
            .charge(&request.tenant_id, thread_id, request.provider, credit)
            .await
        {
            Ok(Charge::Credit(amount)) => {
                tracing::debug!(tenant_id = %request.tenant_id, amount, "Credit deducted");
            }
            Ok(Charge::FreeMessage(count)) => {
                tracing::debug!(tenant_id = %request.tenant_id, count, "Free message counted");
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %request.tenant_id,
                    thread_id = %thread_id,
                    credit,
                    error = %e,
                    "Failed to charge for a stored response"
                );
                self.telemetry.record_write_failure("charge");
            }
        }

        if request.regenerated {
            if let Err(e) = self
                .conversations
                .set_response_model(thread_id, model_for(&request, credential))
                .await
            {
                tracing::error!(thread_id = %thread_id, error = %e, "Failed to record the response model");
                self.telemetry.record_write_failure("response_model");
            }
        } else {
            self.compact(scope, credential).await;
        }

        tracing::info!(
            tenant_id = %request.tenant_id,
            thread_id = %thread_id,
            provider = %request.provider,
            prompt_tokens = completion.prompt_tokens,
            completion_tokens = completion.completion_tokens,
            "Successfully stored the response"
        );
        Ok((text, ReplyStatus::Generated))
    }

    async fn persist_failure(
        &self,
        request: &InvocationRequest,
        classification: &Classification,
    ) -> Result<(String, ReplyStatus), BrokerError> {
        let thread_id = &request.thread_id;
        let _guard = self.sequencer.enter(thread_id).await;

        self.conversations
            .log_error_code(thread_id, &classification.error_code)
            .await?;

        let text = self.fallback.text_for(classification.kind);
        let content = match request.functionality {
            FunctionalityClass::Title => {
                self.conversations.set_title(thread_id, &text.title).await?;
                text.title.clone()
            }
            FunctionalityClass::Chat => {
                self.conversations
                    .append_turn(thread_id, Role::Assistant, &text.content)
                    .await?;
                text.content.clone()
            }
            FunctionalityClass::Summary | FunctionalityClass::Instructions => text.content.clone(),
        };
        Ok((
            content,
            ReplyStatus::Fallback {
                kind: classification.kind,
                error_code: classification.error_code.clone(),
            },
        ))
    }

    /// Compaction failures are logged and skipped; the response itself is
    /// already stored.
    async fn compact(&self, scope: &InvocationScope, credential: &CredentialRecord) {
        let request = scope.request();
        let memory = match self.conversations.memory(&request.thread_id).await {
            Ok(memory) => memory,
            Err(e) => {
                tracing::error!(thread_id = %request.thread_id, error = %e, "Failed to load memory for compaction");
                self.telemetry.record_compaction("failed");
                return;
            }
        };
        if !self
            .compactor
            .should_compact(memory.turn_count(), request.regenerated)
        {
            return;
        }

        let result = self
            .compactor
            .compact(
                &self.invoker,
                scope.provider(),
                request,
                credential,
                scope.secret(),
                &memory,
            )
            .await;
        match result {
            Ok(Some(compaction)) => {
                if let Err(e) = self
                    .conversations
                    .replace_history_with_summary(&request.thread_id, &compaction.summary)
                    .await
                {
                    tracing::error!(thread_id = %request.thread_id, error = %e, "Failed to store the compacted memory");
                    self.telemetry.record_write_failure("compaction");
                    self.telemetry.record_compaction("failed");
                    return;
                }
                if let Err(e) = self
                    .ledger
                    .merge(&request.thread_id, LedgerBucket::Compaction, &compaction.delta)
                    .await
                {
                    tracing::error!(thread_id = %request.thread_id, error = %e, "Failed to record compaction usage in the ledger");
                    self.telemetry.record_write_failure("compaction_ledger");
                }
                if let Err(e) = self
                    .selector
                    .record_usage(
                        credential,
                        FunctionalityClass::Summary,
                        compaction.delta.total_tokens(),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "Failed to record compaction usage");
                }
                self.telemetry.record_compaction("compacted");
                tracing::info!(
                    thread_id = %request.thread_id,
                    pruned_turns = memory.turn_count(),
                    "Conversation memory compacted"
                );
            }
            Ok(None) => {
                self.telemetry.record_compaction("skipped");
                tracing::warn!(thread_id = %request.thread_id, "Compaction returned an empty summary");
            }
            Err(error) => {
                let classification = classifier::classify(&error);
                classification.log(&request.tenant_id, &request.thread_id, request.provider);
                self.telemetry.record_compaction("failed");
                tracing::warn!(thread_id = %request.thread_id, "Compaction skipped after failure");
            }
        }
    }

    async fn revise_instructions(
        &self,
        reviser: &InstructionReviser,
        brain_id: &str,
        scope: &InvocationScope,
        credential: &CredentialRecord,
        answer: &str,
    ) {
        let request = scope.request();
        let exchange = Exchange {
            user: request
                .prompt
                .last_user_message()
                .unwrap_or_default()
                .to_string(),
            assistant: answer.to_string(),
        };
        if let Err(e) = reviser.record(brain_id, exchange).await {
            tracing::warn!(brain_id, error = %e, "Failed to record exchange");
            return;
        }

        match reviser
            .revise_if_due(
                brain_id,
                &self.invoker,
                scope.provider(),
                request,
                credential,
                scope.secret(),
            )
            .await
        {
            Ok(Some(completion)) => {
                self.record_usage(credential, FunctionalityClass::Instructions, &completion)
                    .await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(brain_id, error = %e, "Instruction revision failed"),
        }
    }

    /// Usage counters steer selection only; a failed increment is logged,
    /// never surfaced.
    async fn record_usage(
        &self,
        credential: &CredentialRecord,
        functionality: FunctionalityClass,
        completion: &Completion,
    ) {
        let tokens = completion.delta().total_tokens();
        if let Err(e) = self
            .selector
            .record_usage(credential, functionality, tokens)
            .await
        {
            tracing::warn!(
                credential_id = %credential.id,
                functionality = %functionality,
                error = %e,
                "Failed to record provider usage"
            );
        }
    }
}
