//! Per-thread sequence point.
//!
//! Persistence for one invocation runs while holding its thread's guard, so
//! writes for the same thread never interleave and land in completion
//! order. Different threads never contend. Idle entries are dropped with
//! their last guard.

use broker_core::ThreadId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ThreadSequencer {
    locks: DashMap<ThreadId, Arc<Mutex<()>>>,
}

impl ThreadSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enter(self: &Arc<Self>, thread_id: &ThreadId) -> SequenceGuard {
        let lock = self
            .locks
            .entry(thread_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        SequenceGuard {
            sequencer: Arc::clone(self),
            thread_id: thread_id.clone(),
            guard: Some(guard),
        }
    }

    pub fn active_threads(&self) -> usize {
        self.locks.len()
    }
}

pub struct SequenceGuard {
    sequencer: Arc<ThreadSequencer>,
    thread_id: ThreadId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SequenceGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still holds the lock: nobody is waiting on it.
        self.sequencer
            .locks
            .remove_if(&self.thread_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn thread(id: &str) -> ThreadId {
        ThreadId::new(id.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_same_thread_is_serialised() {
        let sequencer = Arc::new(ThreadSequencer::new());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = sequencer.enter(&thread("t1")).await;
        let waiter = {
            let sequencer = sequencer.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = sequencer.enter(&thread("t1")).await;
                order.lock().push("second");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().push("first");
        drop(first);
        waiter.await.unwrap();

        assert_eq!(*order.lock(), vec!["first", "second"]);
        assert_eq!(sequencer.active_threads(), 0);
    }

    #[tokio::test]
    async fn test_different_threads_do_not_block() {
        let sequencer = Arc::new(ThreadSequencer::new());
        let _a = sequencer.enter(&thread("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), sequencer.enter(&thread("b"))).await;
        assert!(b.is_ok());
    }
}
