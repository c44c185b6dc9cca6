//! Per-brain custom instructions held in process memory.
//!
//! A brain becomes due for revision after `revision_interval` exchanges have
//! been recorded since its instructions were last written.

use async_trait::async_trait;
use broker_core::{Exchange, InstructionStore};
use dashmap::DashMap;
use errors::StorageError;
use std::collections::VecDeque;

const MAX_RETAINED_EXCHANGES: usize = 50;

#[derive(Debug, Default)]
struct BrainState {
    instructions: Option<String>,
    exchanges: VecDeque<Exchange>,
    since_revision: usize,
}

pub struct InMemoryInstructionStore {
    brains: DashMap<String, BrainState>,
    revision_interval: usize,
}

impl InMemoryInstructionStore {
    pub fn new(revision_interval: usize) -> Self {
        Self {
            brains: DashMap::new(),
            revision_interval: revision_interval.max(1),
        }
    }

    pub fn seed(&self, brain_id: &str, instructions: &str) {
        self.brains
            .entry(brain_id.to_string())
            .or_default()
            .instructions = Some(instructions.to_string());
    }
}

impl Default for InMemoryInstructionStore {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl InstructionStore for InMemoryInstructionStore {
    async fn record_exchange(
        &self,
        brain_id: &str,
        exchange: Exchange,
    ) -> Result<(), StorageError> {
        let mut brain = self.brains.entry(brain_id.to_string()).or_default();
        brain.exchanges.push_back(exchange);
        while brain.exchanges.len() > MAX_RETAINED_EXCHANGES {
            brain.exchanges.pop_front();
        }
        brain.since_revision += 1;
        Ok(())
    }

    async fn should_revise(&self, brain_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .brains
            .get(brain_id)
            .is_some_and(|b| b.since_revision >= self.revision_interval))
    }

    async fn current_instructions(&self, brain_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.brains.get(brain_id).and_then(|b| b.instructions.clone()))
    }

    async fn recent_exchanges(
        &self,
        brain_id: &str,
        limit: usize,
    ) -> Result<Vec<Exchange>, StorageError> {
        Ok(self
            .brains
            .get(brain_id)
            .map(|b| {
                let skip = b.exchanges.len().saturating_sub(limit);
                b.exchanges.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn update_instructions(
        &self,
        brain_id: &str,
        instructions: &str,
    ) -> Result<(), StorageError> {
        let mut brain = self.brains.entry(brain_id.to_string()).or_default();
        brain.instructions = Some(instructions.to_string());
        brain.since_revision = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(i: usize) -> Exchange {
        Exchange {
            user: format!("q{i}"),
            assistant: format!("a{i}"),
        }
    }

    #[tokio::test]
    async fn test_revision_due_after_interval() {
        let store = InMemoryInstructionStore::new(2);
        store.record_exchange("b1", exchange(0)).await.unwrap();
        assert!(!store.should_revise("b1").await.unwrap());
        store.record_exchange("b1", exchange(1)).await.unwrap();
        assert!(store.should_revise("b1").await.unwrap());

        store.update_instructions("b1", "Be brief.").await.unwrap();
        assert!(!store.should_revise("b1").await.unwrap());
        assert_eq!(
            store.current_instructions("b1").await.unwrap().as_deref(),
            Some("Be brief.")
        );
    }

    #[tokio::test]
    async fn test_recent_exchanges_keeps_order() {
        let store = InMemoryInstructionStore::new(10);
        for i in 0..4 {
            store.record_exchange("b1", exchange(i)).await.unwrap();
        }
        let recent = store.recent_exchanges("b1", 2).await.unwrap();
        assert_eq!(recent, vec![exchange(2), exchange(3)]);
        assert!(store.recent_exchanges("other", 2).await.unwrap().is_empty());
    }
}
