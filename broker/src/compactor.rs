//! Memory Compactor.
//!
//! Once a thread holds more than `threshold` turns, the whole history is
//! summarised into one digest that replaces it. The summary call goes through
//! the regular invoker, so its failures are ordinary provider errors.

use crate::invoker::ProviderInvoker;
use broker_core::{
    ChatMessage, ConversationMemory, CredentialRecord, FunctionalityClass, InvocationRequest,
    LedgerDelta, PromptPayload, Provider, Role, SecretString,
};
use errors::ProviderError;

const SUMMARY_SYSTEM_PROMPT: &str = "Progressively summarize the conversation provided, adding onto the previous summary and returning a new summary. Keep the facts, decisions and open questions needed to continue the conversation. Reply with the summary only.";

#[derive(Debug, Clone, PartialEq)]
pub struct Compaction {
    pub summary: String,
    pub delta: LedgerDelta,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryCompactor {
    threshold: usize,
}

impl MemoryCompactor {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Replays of a prior turn never compact again.
    pub fn should_compact(&self, turn_count: usize, regenerated: bool) -> bool {
        !regenerated && turn_count > self.threshold
    }

    pub fn prompt(memory: &ConversationMemory) -> PromptPayload {
        let mut transcript = String::new();
        if let Some(summary) = &memory.summary {
            transcript.push_str(&format!("Current summary:\n{summary}\n\nNew lines of conversation:\n"));
        }
        for turn in &memory.turns {
            // The summary turn is already included above.
            if turn.role == Role::System && memory.summary.as_deref() == Some(turn.content.as_str()) {
                continue;
            }
            let speaker = match turn.role {
                Role::User => "Human",
                Role::Assistant => "AI",
                Role::System => "System",
            };
            transcript.push_str(&format!("{speaker}: {}\n", turn.content));
        }
        PromptPayload::new(
            Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            vec![ChatMessage::user(transcript)],
        )
    }

    /// Summarises `memory` with the credential that served the response.
    /// An empty summary yields `None`; the history is then left as is.
    pub async fn compact(
        &self,
        invoker: &ProviderInvoker,
        provider: &dyn Provider,
        request: &InvocationRequest,
        credential: &CredentialRecord,
        secret: &SecretString,
        memory: &ConversationMemory,
    ) -> Result<Option<Compaction>, ProviderError> {
        let mut summary_request = request.clone();
        summary_request.functionality = FunctionalityClass::Summary;
        summary_request.streaming = false;
        summary_request.prompt = Self::prompt(memory);

        let completion = invoker
            .invoke(provider, &summary_request, credential, secret, None)
            .await?;
        let summary = completion.text.trim();
        if summary.is_empty() {
            return Ok(None);
        }
        Ok(Some(Compaction {
            summary: summary.to_string(),
            delta: completion.delta(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::Turn;

    #[test]
    fn test_threshold_and_regeneration() {
        let compactor = MemoryCompactor::new(4);
        assert!(!compactor.should_compact(4, false));
        assert!(compactor.should_compact(5, false));
        assert!(!compactor.should_compact(50, true));
    }

    #[test]
    fn test_prompt_includes_previous_summary_once() {
        let memory = ConversationMemory {
            turns: vec![
                Turn::new(Role::System, "They like Rust."),
                Turn::new(Role::User, "What about async?"),
                Turn::new(Role::Assistant, "Tokio is common."),
            ],
            summary: Some("They like Rust.".to_string()),
        };
        let prompt = MemoryCompactor::prompt(&memory);
        let body = &prompt.messages[0].content;
        assert_eq!(body.matches("They like Rust.").count(), 1);
        assert!(body.contains("Human: What about async?\nAI: Tokio is common.\n"));
    }
}
