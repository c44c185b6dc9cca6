//! Conversation threads held in process memory.
//!
//! Each thread's memory, ledger, title and message log live in one map
//! entry, so every mutation below happens under that entry's lock and is
//! atomic with respect to other writers on the same thread.

use async_trait::async_trait;
use broker_core::{
    ConversationMemory, ConversationRepository, LedgerBucket, LedgerDelta, MessageLogEntry, Role,
    ThreadId, ThreadLedger, Turn,
};
use dashmap::DashMap;
use errors::StorageError;

#[derive(Debug, Clone)]
struct ThreadState {
    memory: ConversationMemory,
    ledger: ThreadLedger,
    title: Option<String>,
    response_model: Option<String>,
    message_log: Vec<MessageLogEntry>,
}

impl ThreadState {
    fn new(thread_id: &ThreadId) -> Self {
        Self {
            memory: ConversationMemory::default(),
            ledger: ThreadLedger::new(thread_id.clone()),
            title: None,
            response_model: None,
            message_log: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    threads: DashMap<ThreadId, ThreadState>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(&self, thread_id: &ThreadId) -> Option<String> {
        self.threads.get(thread_id).and_then(|s| s.title.clone())
    }

    pub fn response_model(&self, thread_id: &ThreadId) -> Option<String> {
        self.threads
            .get(thread_id)
            .and_then(|s| s.response_model.clone())
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn append_turn(
        &self,
        thread_id: &ThreadId,
        role: Role,
        content: &str,
    ) -> Result<usize, StorageError> {
        let mut state = self
            .threads
            .entry(thread_id.clone())
            .or_insert_with(|| ThreadState::new(thread_id));
        state.memory.turns.push(Turn::new(role, content));
        Ok(state.memory.turn_count())
    }

    async fn recent_turns(
        &self,
        thread_id: &ThreadId,
        n: usize,
    ) -> Result<Vec<Turn>, StorageError> {
        Ok(self
            .threads
            .get(thread_id)
            .map(|s| {
                let turns = &s.memory.turns;
                turns[turns.len().saturating_sub(n)..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn memory(&self, thread_id: &ThreadId) -> Result<ConversationMemory, StorageError> {
        Ok(self
            .threads
            .get(thread_id)
            .map(|s| s.memory.clone())
            .unwrap_or_default())
    }

    async fn replace_history_with_summary(
        &self,
        thread_id: &ThreadId,
        summary: &str,
    ) -> Result<(), StorageError> {
        let mut state = self
            .threads
            .entry(thread_id.clone())
            .or_insert_with(|| ThreadState::new(thread_id));
        state.memory = ConversationMemory {
            turns: vec![Turn::new(Role::System, summary)],
            summary: Some(summary.to_string()),
        };
        Ok(())
    }

    async fn merge_ledger(
        &self,
        thread_id: &ThreadId,
        bucket: LedgerBucket,
        delta: &LedgerDelta,
    ) -> Result<ThreadLedger, StorageError> {
        let mut state = self
            .threads
            .entry(thread_id.clone())
            .or_insert_with(|| ThreadState::new(thread_id));
        state.ledger.merge(bucket, delta);
        Ok(state.ledger.clone())
    }

    async fn ledger(&self, thread_id: &ThreadId) -> Result<ThreadLedger, StorageError> {
        Ok(self
            .threads
            .get(thread_id)
            .map(|s| s.ledger.clone())
            .unwrap_or_else(|| ThreadLedger::new(thread_id.clone())))
    }

    async fn set_title(&self, thread_id: &ThreadId, title: &str) -> Result<(), StorageError> {
        self.threads
            .entry(thread_id.clone())
            .or_insert_with(|| ThreadState::new(thread_id))
            .title = Some(title.to_string());
        Ok(())
    }

    async fn set_response_model(
        &self,
        thread_id: &ThreadId,
        model_name: &str,
    ) -> Result<(), StorageError> {
        self.threads
            .entry(thread_id.clone())
            .or_insert_with(|| ThreadState::new(thread_id))
            .response_model = Some(model_name.to_string());
        Ok(())
    }

    async fn log_error_code(
        &self,
        thread_id: &ThreadId,
        error_code: &str,
    ) -> Result<(), StorageError> {
        self.threads
            .entry(thread_id.clone())
            .or_insert_with(|| ThreadState::new(thread_id))
            .message_log
            .push(MessageLogEntry {
                error_code: error_code.to_string(),
                created_at: chrono::Utc::now().timestamp(),
            });
        Ok(())
    }

    async fn message_log(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<MessageLogEntry>, StorageError> {
        Ok(self
            .threads
            .get(thread_id)
            .map(|s| s.message_log.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn thread() -> ThreadId {
        ThreadId::new("thread-1".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_append_and_recent_turns() {
        let repo = InMemoryConversationRepository::new();
        let t = thread();
        for i in 0..5 {
            let count = repo
                .append_turn(&t, Role::User, &format!("m{i}"))
                .await
                .unwrap();
            assert_eq!(count, i + 1);
        }

        let recent = repo.recent_turns(&t, 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
        assert_eq!(repo.recent_turns(&t, 50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_summary_replaces_whole_history() {
        let repo = InMemoryConversationRepository::new();
        let t = thread();
        for _ in 0..6 {
            repo.append_turn(&t, Role::User, "hello").await.unwrap();
        }
        repo.replace_history_with_summary(&t, "digest").await.unwrap();

        let memory = repo.memory(&t).await.unwrap();
        assert!(memory.is_summary_only());
        assert_eq!(memory.turn_count(), 1);
    }

    #[tokio::test]
    async fn test_ledger_buckets_are_separate() {
        let repo = InMemoryConversationRepository::new();
        let t = thread();
        repo.merge_ledger(&t, LedgerBucket::Response, &LedgerDelta::new(10, 5, 0.1))
            .await
            .unwrap();
        let ledger = repo
            .merge_ledger(&t, LedgerBucket::Compaction, &LedgerDelta::new(3, 2, 0.01))
            .await
            .unwrap();
        assert_eq!(ledger.response.total_used, 15);
        assert_eq!(ledger.compaction.total_used, 5);
        assert_eq!(repo.ledger(&t).await.unwrap(), ledger);
    }

    #[tokio::test]
    async fn test_title_model_and_log() {
        let repo = InMemoryConversationRepository::new();
        let t = thread();
        repo.set_title(&t, "Trip planning").await.unwrap();
        repo.set_response_model(&t, "gpt-4o").await.unwrap();
        repo.log_error_code(&t, "request_time_out").await.unwrap();

        assert_eq!(repo.title(&t).as_deref(), Some("Trip planning"));
        assert_eq!(repo.response_model(&t).as_deref(), Some("gpt-4o"));
        let log = repo.message_log(&t).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].error_code, "request_time_out");
    }

    proptest! {
        #[test]
        fn prop_ledger_total_is_sum_of_parts(
            deltas in proptest::collection::vec((0u64..10_000, 0u64..10_000, 0.0f64..5.0), 1..20)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let repo = InMemoryConversationRepository::new();
            let t = thread();
            let mut last_cost = 0.0;
            for (p, c, cost) in deltas {
                let ledger = rt
                    .block_on(repo.merge_ledger(&t, LedgerBucket::Response, &LedgerDelta::new(p, c, cost)))
                    .unwrap();
                prop_assert_eq!(
                    ledger.response.total_used,
                    ledger.response.prompt_tokens + ledger.response.completion_tokens
                );
                prop_assert!(ledger.response.total_cost >= last_cost);
                last_cost = ledger.response.total_cost;
            }
        }
    }
}
