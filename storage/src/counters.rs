//! Namespaced usage counters held in process memory.

use async_trait::async_trait;
use broker_core::CounterStore;
use dashmap::DashMap;
use errors::StorageError;

#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, u64>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, by: u64) -> Result<u64, StorageError> {
        let mut value = self.counters.entry(key.to_string()).or_insert(0);
        *value = value.saturating_add(by);
        Ok(*value)
    }

    async fn get(&self, key: &str) -> Result<u64, StorageError> {
        Ok(self.counters.get(key).map_or(0, |v| *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryCounterStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.increment("usage:acme:OPEN_AI:CHAT", 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("usage:acme:OPEN_AI:CHAT").await.unwrap(), 1600);
        assert_eq!(store.get("missing").await.unwrap(), 0);
    }
}
