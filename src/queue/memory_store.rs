//! Process-local set store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use tokio::sync::Mutex;

use super::{QueueStore, Result};

/// In-memory [`QueueStore`] with the same set semantics as the shared backends.
///
/// Queues vanish with the process, so this store only suits tests and
/// single-process dry runs.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    queues: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemoryQueueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, queue: &str, payload: &str) -> Result<bool> {
        let mut queues = self.queues.lock().await;
        Ok(queues
            .entry(queue.to_string())
            .or_default()
            .insert(payload.to_string()))
    }

    async fn dequeue_random(&self, queue: &str) -> Result<Option<String>> {
        let mut queues = self.queues.lock().await;
        let Some(members) = queues.get_mut(queue) else {
            return Ok(None);
        };
        let picked = members.iter().choose(&mut rand::thread_rng()).cloned();
        if let Some(payload) = &picked {
            members.remove(payload);
        }
        Ok(picked)
    }

    async fn count(&self, queue: &str) -> Result<u64> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map_or(0, |members| members.len() as u64))
    }
}
