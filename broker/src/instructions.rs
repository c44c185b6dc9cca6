//! Custom-instruction revision.
//!
//! Every answered exchange on a brain is recorded. When the store reports a
//! brain as due, its instructions and recent exchanges are condensed into a
//! short profile that replaces the instructions.

use crate::classifier;
use crate::invoker::ProviderInvoker;
use broker_core::{
    ChatMessage, Completion, CredentialRecord, Exchange, FunctionalityClass, InstructionStore,
    InvocationRequest, PromptPayload, Provider, SecretString,
};
use errors::StorageError;
use std::sync::Arc;

const REVISION_SYSTEM_PROMPT: &str = "You are an AI assistant that analyzes a user's custom instructions and recent conversations. Your task is to generate a short, 2 to 4 sentence summary capturing the user's main interests, behavior patterns, and preferences. Be concise, clear, and avoid any Markdown formatting.";

pub struct InstructionReviser {
    store: Arc<dyn InstructionStore>,
    recent_limit: usize,
}

impl InstructionReviser {
    pub fn new(store: Arc<dyn InstructionStore>, recent_limit: usize) -> Self {
        Self {
            store,
            recent_limit,
        }
    }

    pub async fn record(&self, brain_id: &str, exchange: Exchange) -> Result<(), StorageError> {
        self.store.record_exchange(brain_id, exchange).await
    }

    pub fn prompt(current: &str, exchanges: &[Exchange]) -> PromptPayload {
        let context: String = exchanges
            .iter()
            .map(|e| format!("User: {}\nAI: {}\n", e.user, e.assistant))
            .collect();
        let user = format!(
            "Here are the current custom instructions:\n\n{current}\n\nHere are recent conversations between the user and the AI:\n\n{context}\n\nPlease return only the short summary based on this information."
        );
        PromptPayload::new(
            Some(REVISION_SYSTEM_PROMPT.to_string()),
            vec![ChatMessage::user(user)],
        )
    }

    /// Revises the brain's instructions if it is due. Provider failures are
    /// classified, logged and swallowed; the returned completion (if any) is
    /// what the revision cost.
    pub async fn revise_if_due(
        &self,
        brain_id: &str,
        invoker: &ProviderInvoker,
        provider: &dyn Provider,
        request: &InvocationRequest,
        credential: &CredentialRecord,
        secret: &SecretString,
    ) -> Result<Option<Completion>, StorageError> {
        if !self.store.should_revise(brain_id).await? {
            return Ok(None);
        }
        tracing::info!(brain_id, thread_id = %request.thread_id, "Revising custom instructions");

        let current = self
            .store
            .current_instructions(brain_id)
            .await?
            .unwrap_or_default();
        let exchanges = self
            .store
            .recent_exchanges(brain_id, self.recent_limit)
            .await?;

        let mut revision = request.clone();
        revision.functionality = FunctionalityClass::Instructions;
        revision.streaming = false;
        revision.prompt = Self::prompt(&current, &exchanges);

        match invoker
            .invoke(provider, &revision, credential, secret, None)
            .await
        {
            Ok(completion) => {
                let revised = completion.text.trim();
                if !revised.is_empty() {
                    self.store.update_instructions(brain_id, revised).await?;
                }
                Ok(Some(completion))
            }
            Err(error) => {
                let classification = classifier::classify(&error);
                classification.log(&request.tenant_id, &request.thread_id, request.provider);
                tracing::warn!(brain_id, kind = %classification.kind, "Instruction revision skipped");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_formats_context() {
        let prompt = InstructionReviser::prompt(
            "Answer briefly.",
            &[Exchange {
                user: "hi".to_string(),
                assistant: "hello".to_string(),
            }],
        );
        let body = &prompt.messages[0].content;
        assert!(body.starts_with("Here are the current custom instructions:\n\nAnswer briefly."));
        assert!(body.contains("User: hi\nAI: hello\n"));
        assert!(prompt.system.unwrap().contains("2 to 4 sentence summary"));
    }
}
