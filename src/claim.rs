//! At-most-once task claims shared by every worker.
//!
//! A task fanned out to several queues may reach several workers. Each worker
//! increments a counter keyed by the task id; only the worker that sees `1`
//! runs the task. Keys expire after twice the maximum queue wait, so no
//! cleanup is needed and an id cannot be claimed twice inside that window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use crate::store::poisoned;

/// A store with an atomic increment-and-expire operation.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Increment `key` and return the new value. A key created by this call
    /// expires after `ttl`.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;
}

/// In-process claim store. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MemoryClaimStore {
    counters: Arc<Mutex<HashMap<String, (u64, Option<Instant>)>>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut counters = self.counters.lock().map_err(poisoned)?;
        counters.retain(|_, (_, expires)| expires.is_none_or(|at| at > now));
        let entry = counters
            .entry(key.to_string())
            .or_insert((0, now.checked_add(ttl)));
        entry.0 += 1;
        Ok(entry.0)
    }
}

/// Claims tasks for this worker.
#[derive(Clone)]
pub struct TaskClaim {
    store: Arc<dyn ClaimStore>,
    ttl: Duration,
}

impl TaskClaim {
    /// `max_queue_time` is the longest a task may wait in a queue.
    pub fn new(store: Arc<dyn ClaimStore>, max_queue_time: Duration) -> Self {
        Self {
            store,
            ttl: max_queue_time.saturating_mul(2),
        }
    }

    pub fn key(task_id: &str) -> String {
        format!("task_agent_assignment:{}", task_id)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True when this worker is the first to claim `task_id`.
    pub async fn claim(&self, task_id: &str) -> Result<bool> {
        let count = self.store.incr_with_ttl(&Self::key(task_id), self.ttl).await?;
        if count != 1 {
            tracing::debug!(task_id, count, "task already claimed by another worker");
        }
        Ok(count == 1)
    }
}

impl std::fmt::Debug for TaskClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskClaim").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}
