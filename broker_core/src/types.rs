use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use strum::{Display, EnumString};
use tokio::sync::mpsc;
use zeroize::Zeroizing;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() || id.len() > 100 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid tenant ID"))
    }
}

/// Opaque conversation thread identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() { None } else { Some(Self(id)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ThreadId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid thread ID"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CredentialId(String);

impl CredentialId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() { None } else { Some(Self(id)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CredentialId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid credential ID"))
    }
}

/// Upstream model provider. Wire codes match the tenant configuration
/// records (`OPEN_AI`, `OPEN_ROUTER`, `ANTHROPIC`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
    Anthropic,
}

/// Tag scoping credential selection and usage accounting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionalityClass {
    Chat,
    Title,
    Summary,
    Instructions,
}

/// Internal failure taxonomy.
///
/// The first eight kinds are produced by classifying provider failures and
/// always resolve to a fallback reply. `DecryptionError` and
/// `NoUsableCredential` are configuration-class: they reject the request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    RateLimited,
    Timeout,
    ConnectionFailed,
    UpstreamStatusError,
    OutputTruncated,
    ContentFiltered,
    DecryptionError,
    NoUsableCredential,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::NotFound,
        ErrorKind::RateLimited,
        ErrorKind::Timeout,
        ErrorKind::ConnectionFailed,
        ErrorKind::UpstreamStatusError,
        ErrorKind::OutputTruncated,
        ErrorKind::ContentFiltered,
        ErrorKind::DecryptionError,
        ErrorKind::NoUsableCredential,
        ErrorKind::Unknown,
    ];

    pub fn is_configuration(&self) -> bool {
        matches!(self, ErrorKind::DecryptionError | ErrorKind::NoUsableCredential)
    }
}

/// Tenant provider credential as held by the secret store.
///
/// The secret stays sealed here; only the secret store adapter opens it, and
/// only for the lifetime of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub id: CredentialId,
    pub tenant_id: TenantId,
    pub provider: ProviderKind,
    pub model_name: String,
    pub encrypted_secret: String,
    #[serde(default)]
    pub is_deprecated: bool,
    #[serde(default)]
    pub extra_config: HashMap<String, serde_json::Value>,
}

impl CredentialRecord {
    pub fn settings(&self) -> ModelSettings {
        ModelSettings {
            temperature: self
                .extra_config
                .get("temperature")
                .and_then(serde_json::Value::as_f64)
                .map(|t| t as f32),
            max_tokens: self
                .extra_config
                .get("max_tokens")
                .and_then(serde_json::Value::as_u64)
                .map(|t| t as u32),
            api_base: self
                .extra_config
                .get("api_base")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Per-credential model knobs carried in `extra_config`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSettings {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub api_base: Option<String>,
}

/// Plaintext secret that is wiped from memory on drop.
#[derive(Clone)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub fn new(secret: String) -> Self {
        Self(Zeroizing::new(secret))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Fully rendered prompt handed over by the template layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPayload {
    #[serde(default)]
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
}

impl PromptPayload {
    pub fn new(system: Option<String>, messages: Vec<ChatMessage>) -> Self {
        Self { system, messages }
    }

    pub fn from_user(content: impl Into<String>) -> Self {
        Self {
            system: None,
            messages: vec![ChatMessage::user(content)],
        }
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// One model invocation, owned by the lifecycle manager for its duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub tenant_id: TenantId,
    pub thread_id: ThreadId,
    pub provider: ProviderKind,
    pub functionality: FunctionalityClass,
    /// Overrides the model configured on the credential.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Pins a specific credential instead of letting the selector choose.
    #[serde(default)]
    pub credential_id: Option<CredentialId>,
    pub prompt: PromptPayload,
    #[serde(default)]
    pub streaming: bool,
    /// Replay of a prior turn; never re-compacts memory.
    #[serde(default)]
    pub regenerated: bool,
    #[serde(default)]
    pub brain_id: Option<String>,
    /// Credit charged to paid tenants; falls back to the configured default.
    #[serde(default)]
    pub message_credit: Option<f64>,
}

impl InvocationRequest {
    pub fn new(
        tenant_id: TenantId,
        thread_id: ThreadId,
        provider: ProviderKind,
        functionality: FunctionalityClass,
        prompt: PromptPayload,
    ) -> Self {
        Self {
            tenant_id,
            thread_id,
            provider,
            functionality,
            model_name: None,
            credential_id: None,
            prompt,
            streaming: false,
            regenerated: false,
            brain_id: None,
            message_credit: None,
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn regenerated(mut self, regenerated: bool) -> Self {
        self.regenerated = regenerated;
        self
    }

    pub fn with_credential(mut self, credential_id: CredentialId) -> Self {
        self.credential_id = Some(credential_id);
        self
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_brain(mut self, brain_id: impl Into<String>) -> Self {
        self.brain_id = Some(brain_id.into());
        self
    }
}

/// Generated text plus the accounting for producing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    /// Set once the first non-empty token arrived on a streaming call.
    pub stream_active: bool,
}

impl Completion {
    /// A streaming call that never produced a token: nothing to persist.
    pub fn condensed() -> Self {
        Self {
            text: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: 0.0,
            stream_active: false,
        }
    }

    /// Whitespace-only text counts as empty; it is stored trimmed.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn delta(&self) -> LedgerDelta {
        LedgerDelta::new(self.prompt_tokens, self.completion_tokens, self.cost)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum InvocationOutcome {
    Success(Completion),
    Failure { kind: ErrorKind, raw_message: String },
}

/// Additive change to a ledger. Cost is clamped to a finite, non-negative
/// value so merges can never make a ledger's cost go down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDelta {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

impl LedgerDelta {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, cost: f64) -> Self {
        let cost = if cost.is_finite() && cost > 0.0 {
            cost
        } else {
            0.0
        };
        Self {
            prompt_tokens,
            completion_tokens,
            cost,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens() == 0 && self.cost == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLedgerEntry {
    pub thread_id: ThreadId,
    pub total_used: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
}

impl UsageLedgerEntry {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            total_used: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_cost: 0.0,
        }
    }

    /// Additive merge. Applying the same delta twice counts it twice.
    pub fn merge(&mut self, delta: &LedgerDelta) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(delta.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(delta.completion_tokens);
        self.total_used = self.prompt_tokens.saturating_add(self.completion_tokens);
        self.total_cost += delta.cost;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LedgerBucket {
    Response,
    Compaction,
}

/// Per-thread counters. Compaction spend is kept apart from response spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadLedger {
    pub response: UsageLedgerEntry,
    pub compaction: UsageLedgerEntry,
}

impl ThreadLedger {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            response: UsageLedgerEntry::new(thread_id.clone()),
            compaction: UsageLedgerEntry::new(thread_id),
        }
    }

    pub fn merge(&mut self, bucket: LedgerBucket, delta: &LedgerDelta) {
        match bucket {
            LedgerBucket::Response => self.response.merge(delta),
            LedgerBucket::Compaction => self.compaction.merge(delta),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Ordered turns plus the rolling summary that replaced any pruned ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub turns: Vec<Turn>,
    pub summary: Option<String>,
}

impl ConversationMemory {
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn is_summary_only(&self) -> bool {
        match (&self.summary, self.turns.as_slice()) {
            (Some(summary), [only]) => only.role == Role::System && &only.content == summary,
            _ => false,
        }
    }
}

/// Tenant-visible record of a classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLogEntry {
    pub error_code: String,
    pub created_at: i64,
}

/// One user/assistant exchange fed to instruction revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

/// A single call as handed to a provider.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub model: String,
    pub api_key: SecretString,
    pub api_base: Option<String>,
    pub prompt: PromptPayload,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub streaming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderResponse {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Receives streamed tokens from a provider.
///
/// The first non-empty token flips the stream-active flag. Tokens are
/// forwarded to the caller when a channel is attached; a closed channel
/// (caller went away) is ignored so the invocation still completes.
#[derive(Debug, Default)]
pub struct TokenSink {
    active: AtomicBool,
    received: AtomicU64,
    forward: Option<mpsc::UnboundedSender<String>>,
}

impl TokenSink {
    pub fn new(forward: Option<mpsc::UnboundedSender<String>>) -> Self {
        Self {
            active: AtomicBool::new(false),
            received: AtomicU64::new(0),
            forward,
        }
    }

    pub fn push(&self, token: &str) {
        if token.is_empty() {
            return;
        }
        self.active.store(true, Ordering::Release);
        self.received.fetch_add(1, Ordering::Relaxed);
        if let Some(forward) = &self.forward {
            let _ = forward.send(token.to_string());
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread() -> ThreadId {
        ThreadId::new("thread-1".to_string()).unwrap()
    }

    #[test]
    fn test_ids_reject_empty() {
        assert!(TenantId::new(String::new()).is_none());
        assert!(TenantId::new("x".repeat(101)).is_none());
        assert!(ThreadId::new(String::new()).is_none());
        assert!(CredentialId::new("key-1".to_string()).is_some());
    }

    #[test]
    fn test_provider_kind_wire_codes() {
        assert_eq!(ProviderKind::OpenAi.to_string(), "OPEN_AI");
        assert_eq!(ProviderKind::OpenRouter.to_string(), "OPEN_ROUTER");
        assert_eq!(
            "ANTHROPIC".parse::<ProviderKind>().unwrap(),
            ProviderKind::Anthropic
        );
        let json = serde_json::to_string(&ProviderKind::OpenAi).unwrap();
        assert_eq!(json, "\"OPEN_AI\"");
    }

    #[test]
    fn test_error_kind_configuration_class() {
        let config: Vec<_> = ErrorKind::ALL
            .iter()
            .filter(|k| k.is_configuration())
            .collect();
        assert_eq!(
            config,
            vec![&ErrorKind::DecryptionError, &ErrorKind::NoUsableCredential]
        );
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
    }

    #[test]
    fn test_ledger_merge_keeps_total_consistent() {
        let mut ledger = UsageLedgerEntry::new(thread());
        ledger.merge(&LedgerDelta::new(10, 5, 0.01));
        ledger.merge(&LedgerDelta::new(3, 7, 0.02));
        assert_eq!(ledger.prompt_tokens, 13);
        assert_eq!(ledger.completion_tokens, 12);
        assert_eq!(ledger.total_used, 25);
        assert!((ledger.total_cost - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_ledger_double_merge_doubles() {
        let delta = LedgerDelta::new(100, 50, 0.5);
        let mut ledger = UsageLedgerEntry::new(thread());
        ledger.merge(&delta);
        ledger.merge(&delta);
        assert_eq!(ledger.total_used, 300);
        assert!((ledger.total_cost - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_whitespace_completion_is_empty() {
        let mut completion = Completion::condensed();
        completion.text = "  \n ".to_string();
        assert!(completion.is_empty());
        completion.text = " ok ".to_string();
        assert!(!completion.is_empty());
    }

    #[test]
    fn test_ledger_delta_clamps_bad_cost() {
        assert_eq!(LedgerDelta::new(1, 1, -3.0).cost, 0.0);
        assert_eq!(LedgerDelta::new(1, 1, f64::NAN).cost, 0.0);
        assert_eq!(LedgerDelta::new(1, 1, f64::INFINITY).cost, 0.0);
    }

    #[test]
    fn test_credential_settings_from_extra_config() {
        let mut extra_config = HashMap::new();
        extra_config.insert("temperature".to_string(), serde_json::json!(0.2));
        extra_config.insert("max_tokens".to_string(), serde_json::json!(256));
        let record = CredentialRecord {
            id: CredentialId::new("c1".to_string()).unwrap(),
            tenant_id: TenantId::new("t1".to_string()).unwrap(),
            provider: ProviderKind::OpenAi,
            model_name: "gpt-4.1-mini".to_string(),
            encrypted_secret: String::new(),
            is_deprecated: false,
            extra_config,
        };
        let settings = record.settings();
        assert_eq!(settings.temperature, Some(0.2));
        assert_eq!(settings.max_tokens, Some(256));
        assert_eq!(settings.api_base, None);
    }

    #[test]
    fn test_secret_string_debug_is_redacted() {
        let secret = SecretString::new("sk-live-123".to_string());
        assert_eq!(format!("{secret:?}"), "SecretString([REDACTED])");
        assert_eq!(secret.expose(), "sk-live-123");
    }

    #[test]
    fn test_token_sink_flags_first_non_empty_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TokenSink::new(Some(tx));
        sink.push("");
        assert!(!sink.is_active());
        sink.push("Hel");
        sink.push("lo");
        assert!(sink.is_active());
        assert_eq!(sink.received(), 2);
        assert_eq!(rx.try_recv().unwrap(), "Hel");
        assert_eq!(rx.try_recv().unwrap(), "lo");
    }

    #[test]
    fn test_token_sink_ignores_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = TokenSink::new(Some(tx));
        sink.push("still counted");
        assert!(sink.is_active());
    }

    #[test]
    fn test_summary_only_memory() {
        let memory = ConversationMemory {
            turns: vec![Turn::new(Role::System, "digest")],
            summary: Some("digest".to_string()),
        };
        assert!(memory.is_summary_only());

        let memory = ConversationMemory {
            turns: vec![
                Turn::new(Role::System, "digest"),
                Turn::new(Role::Assistant, "more"),
            ],
            summary: Some("digest".to_string()),
        };
        assert!(!memory.is_summary_only());
    }
}
