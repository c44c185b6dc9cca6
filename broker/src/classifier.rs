//! Error Classifier.
//!
//! A pure mapping from raw provider failures onto [`ErrorKind`] plus the
//! code written to the tenant-visible message log. Nothing here performs
//! I/O; logging of a classification is a separate, explicit step.

use broker_core::{Completion, ErrorKind, InvocationOutcome, ProviderKind, TenantId, ThreadId};
use errors::{BrokerError, ProviderError};
use serde::Serialize;
use serde_json::Value;

/// Message-log code for anything without a more specific entry.
pub const COMMON_RESPONSE: &str = "common_response";
pub const REQUEST_TIMED_OUT: &str = "request_time_out";
pub const CONNECTION_ERROR: &str = "connection_error";
pub const CONTENT_FILTER_ISSUE: &str = "content_filter_issue";

/// Codes the message log knows how to render. Anything else is reported as
/// `common_response` and logged as new.
pub const KNOWN_ERROR_CODES: &[&str] = &[
    COMMON_RESPONSE,
    REQUEST_TIMED_OUT,
    CONNECTION_ERROR,
    CONTENT_FILTER_ISSUE,
    "model_not_found",
    "rate_limit_exceeded",
    "insufficient_quota",
    "invalid_api_key",
    "context_length_exceeded",
    "not_found_error",
    "rate_limit_error",
    "overloaded_error",
    "authentication_error",
    "permission_error",
    "invalid_request_error",
    "api_error",
    "server_error",
];

const MAX_MESSAGE_CHARS: usize = 300;

pub fn is_known_code(code: &str) -> bool {
    KNOWN_ERROR_CODES.contains(&code)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: ErrorKind,
    /// Code written to the message log; always a known code.
    pub error_code: String,
    /// Code reported by the upstream, if one could be extracted.
    pub upstream_code: Option<String>,
    /// Short operator-facing message. Never shown to tenants.
    pub message: String,
}

impl Classification {
    /// Whether the upstream spoke a code the taxonomy already covers.
    pub fn is_known(&self) -> bool {
        self.kind != ErrorKind::Unknown
            && self.upstream_code.as_deref().is_none_or(is_known_code)
    }

    /// Only a model or key the provider no longer recognises retires the
    /// credential. Rate limits are transient.
    pub fn deprecates_credential(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn log(&self, tenant_id: &TenantId, thread_id: &ThreadId, provider: ProviderKind) {
        let upstream_code = self.upstream_code.as_deref().unwrap_or("-");
        if self.is_known() {
            tracing::error!(
                tenant_id = %tenant_id,
                thread_id = %thread_id,
                provider = %provider,
                kind = %self.kind,
                error_code = %self.error_code,
                upstream_code,
                message = %self.message,
                "Provider call failed"
            );
        } else {
            tracing::warn!(
                tenant_id = %tenant_id,
                thread_id = %thread_id,
                provider = %provider,
                kind = %self.kind,
                error_code = %self.error_code,
                upstream_code,
                message = %self.message,
                "new error code observed"
            );
        }
    }
}

/// Upstream error code and message from an OpenAI- or Anthropic-shaped
/// body: `{"error": {"code" | "type": ..., "message": ...}}`. Numeric codes
/// (OpenRouter) come back as their decimal string.
pub fn extract_error_code(body: &str) -> (Option<String>, Option<String>) {
    let Some(value) = parse_embedded_json(body) else {
        return (None, None);
    };
    let error = value.get("error").unwrap_or(&value);

    let code = ["code", "type"]
        .iter()
        .filter_map(|field| error.get(*field))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    (code, message)
}

fn parse_embedded_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Kind implied by an upstream code when the transport status is absent or
/// uninformative.
fn kind_for_code(code: &str) -> Option<ErrorKind> {
    match code {
        "model_not_found" | "not_found_error" | "404" => Some(ErrorKind::NotFound),
        "rate_limit_exceeded" | "rate_limit_error" | "429" => Some(ErrorKind::RateLimited),
        "context_length_exceeded" => Some(ErrorKind::OutputTruncated),
        "408" => Some(ErrorKind::Timeout),
        _ => None,
    }
}

fn message_log_code(upstream_code: Option<&str>) -> String {
    upstream_code
        .filter(|c| is_known_code(c))
        .unwrap_or(COMMON_RESPONSE)
        .to_string()
}

/// Deterministic for a given error: the same raw shape always yields the
/// same classification.
pub fn classify(error: &ProviderError) -> Classification {
    match error {
        ProviderError::Status { status, body } => {
            let (upstream_code, message) = extract_error_code(body);
            let kind = match status {
                404 => ErrorKind::NotFound,
                429 => ErrorKind::RateLimited,
                408 | 504 => ErrorKind::Timeout,
                _ => ErrorKind::UpstreamStatusError,
            };
            Classification {
                kind,
                error_code: message_log_code(upstream_code.as_deref()),
                message: short(message.as_deref().unwrap_or(body)),
                upstream_code,
            }
        }
        ProviderError::Timeout { message } => Classification {
            kind: ErrorKind::Timeout,
            error_code: REQUEST_TIMED_OUT.to_string(),
            upstream_code: None,
            message: short(message),
        },
        ProviderError::Connection { message } => Classification {
            kind: ErrorKind::ConnectionFailed,
            error_code: CONNECTION_ERROR.to_string(),
            upstream_code: None,
            message: short(message),
        },
        ProviderError::LengthLimited { .. } => Classification {
            kind: ErrorKind::OutputTruncated,
            error_code: CONTENT_FILTER_ISSUE.to_string(),
            upstream_code: None,
            message: error.to_string(),
        },
        ProviderError::ContentFiltered { .. } => Classification {
            kind: ErrorKind::ContentFiltered,
            error_code: CONTENT_FILTER_ISSUE.to_string(),
            upstream_code: None,
            message: error.to_string(),
        },
        ProviderError::InvalidResponse { message } | ProviderError::Other { message } => {
            let (upstream_code, extracted) = extract_error_code(message);
            let kind = upstream_code
                .as_deref()
                .and_then(kind_for_code)
                .unwrap_or(ErrorKind::Unknown);
            Classification {
                kind,
                error_code: message_log_code(upstream_code.as_deref()),
                message: short(extracted.as_deref().unwrap_or(message)),
                upstream_code,
            }
        }
    }
}

fn short(message: &str) -> String {
    utils::truncate_for_log(message.trim(), MAX_MESSAGE_CHARS)
}

/// Where a rejected request falls in the taxonomy, if it is a
/// configuration-class rejection.
pub fn rejection_kind(error: &BrokerError) -> Option<ErrorKind> {
    match error {
        BrokerError::DecryptionError { .. } => Some(ErrorKind::DecryptionError),
        BrokerError::NoUsableCredential { .. } | BrokerError::CredentialNotFound { .. } => {
            Some(ErrorKind::NoUsableCredential)
        }
        _ => None,
    }
}

pub fn outcome(result: Result<Completion, ProviderError>) -> InvocationOutcome {
    match result {
        Ok(completion) => InvocationOutcome::Success(completion),
        Err(error) => InvocationOutcome::Failure {
            kind: classify(&error).kind,
            raw_message: error.raw_message(),
        },
    }
}
