//! Task broker access used by the queue timeout detector.
//!
//! Check tasks are published to per-capability queues (one per transport)
//! with a broker-level time-to-live. Expired messages are routed to a shared
//! dead-letter queue:
//!
//! ```text
//! requests ─┐
//! firefox  ─┼─ ttl expired ─▶ task-dlq
//! chrome   ─┘
//! ```

pub mod timeouts;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::store::poisoned;

pub use timeouts::QueueTimeoutDetector;

/// Stored result of a task revoked because it expired before a worker took it.
pub const EXPIRED_RESULT: &str = "expired";

/// Name of the dead-letter queue fed by every check queue.
pub const DEAD_LETTER_QUEUE: &str = "task-dlq";

/// A message read from the dead-letter queue. Must be acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Revoked task ids, per worker.
    async fn revoked_tasks(&self) -> Result<BTreeMap<String, Vec<String>>>;

    /// Stored result of a task, if any.
    async fn task_result(&self, task_id: &str) -> Result<Option<String>>;

    /// Drop a task's stored result.
    async fn forget_result(&self, task_id: &str) -> Result<()>;

    /// Next dead-letter message. May wait indefinitely when the queue is
    /// empty; callers bound the wait.
    async fn next_dead_letter(&self) -> Result<Option<DeadLetter>>;

    async fn ack(&self, delivery_tag: u64) -> Result<()>;
}

#[derive(Debug, Default)]
struct BrokerState {
    revoked: BTreeMap<String, Vec<String>>,
    results: HashMap<String, String>,
    dead_letters: VecDeque<DeadLetter>,
    next_tag: u64,
    unacked: Vec<u64>,
}

/// In-process broker. An empty dead-letter queue never yields, like a
/// blocking consumer.
#[derive(Debug, Default, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `task_id` as revoked on `worker` with the given stored result.
    pub fn revoke(&self, worker: &str, task_id: &str, result: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state
            .revoked
            .entry(worker.to_string())
            .or_default()
            .push(task_id.to_string());
        if let Some(result) = result {
            state.results.insert(task_id.to_string(), result.to_string());
        }
        Ok(())
    }

    pub fn push_dead_letter(&self, body: impl Into<Vec<u8>>) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.next_tag += 1;
        let delivery_tag = state.next_tag;
        state.dead_letters.push_back(DeadLetter {
            delivery_tag,
            body: body.into(),
        });
        Ok(())
    }

    /// Delivered dead letters not yet acknowledged.
    pub fn unacked(&self) -> Result<Vec<u64>> {
        Ok(self.state.lock().map_err(poisoned)?.unacked.clone())
    }

    pub fn pending_dead_letters(&self) -> Result<usize> {
        Ok(self.state.lock().map_err(poisoned)?.dead_letters.len())
    }
}

#[async_trait]
impl QueueBroker for MemoryBroker {
    async fn revoked_tasks(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(self.state.lock().map_err(poisoned)?.revoked.clone())
    }

    async fn task_result(&self, task_id: &str) -> Result<Option<String>> {
        Ok(self.state.lock().map_err(poisoned)?.results.get(task_id).cloned())
    }

    async fn forget_result(&self, task_id: &str) -> Result<()> {
        self.state.lock().map_err(poisoned)?.results.remove(task_id);
        Ok(())
    }

    async fn next_dead_letter(&self) -> Result<Option<DeadLetter>> {
        let message = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let message = state.dead_letters.pop_front();
            if let Some(message) = &message {
                state.unacked.push(message.delivery_tag);
            }
            message
        };
        match message {
            Some(message) => Ok(Some(message)),
            None => std::future::pending().await,
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let Some(index) = state.unacked.iter().position(|tag| *tag == delivery_tag) else {
            bail!("Unknown delivery tag {}", delivery_tag);
        };
        state.unacked.remove(index);
        Ok(())
    }
}
