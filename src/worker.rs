//! Per-process worker context.
//!
//! A worker process builds one [`WorkerContext`] at startup and hands every
//! task it receives to [`WorkerContext::handle_task`]. The context owns the
//! process's single cached browser, so tasks on one worker run one at a time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::browser::{BrowserLauncher, BrowserPool};
use crate::check::{Check, RunOutcome, TriggerType};
use crate::claim::{ClaimStore, TaskClaim};
use crate::config::WorkerConfig;
use crate::errors::RunError;
use crate::orchestrator::RunOrchestrator;
use crate::plugins::PluginRegistry;
use crate::store::{ArtifactStore, MetricsSink, RunStore};

/// A queued request to run a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTask {
    pub task_id: String,
    pub check_name: String,
    pub environment: String,
    pub trigger: TriggerType,
}

/// External services a worker talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub runs: Arc<dyn RunStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub metrics: Arc<dyn MetricsSink>,
    pub claims: Arc<dyn ClaimStore>,
}

pub struct WorkerContext {
    runs: Arc<dyn RunStore>,
    claim: TaskClaim,
    orchestrator: RunOrchestrator,
    pool: Mutex<BrowserPool>,
}

impl WorkerContext {
    pub fn new(
        config: WorkerConfig,
        collaborators: Collaborators,
        plugins: PluginRegistry,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let config = Arc::new(config);
        let claim = TaskClaim::new(collaborators.claims, config.max_check_queue_time());
        let pool = BrowserPool::new(launcher, config.browser.clone());
        let orchestrator = RunOrchestrator::new(
            Arc::clone(&config),
            Arc::clone(&collaborators.runs),
            collaborators.artifacts,
            collaborators.metrics,
            Arc::new(plugins),
        );
        Self {
            runs: collaborators.runs,
            claim,
            orchestrator,
            pool: Mutex::new(pool),
        }
    }

    pub fn orchestrator(&self) -> &RunOrchestrator {
        &self.orchestrator
    }

    /// Run the task's check unless another worker claimed it first.
    ///
    /// Returns `None` when the task was already claimed or the check is
    /// disabled.
    pub async fn handle_task(&self, task: &CheckTask) -> Result<Option<RunOutcome>, RunError> {
        if !self.claim.claim(&task.task_id).await? {
            tracing::info!(task_id = %task.task_id, check = %task.check_name, "task claimed by another worker, skipping");
            return Ok(None);
        }

        let check = self
            .runs
            .load_check(&task.check_name, &task.environment)
            .await
            .map_err(RunError::Store)?
            .ok_or_else(|| RunError::CheckNotFound {
                name: task.check_name.clone(),
                environment: task.environment.clone(),
            })?;
        if !check.enabled {
            tracing::info!(task_id = %task.task_id, check = %check.name, "check disabled, skipping");
            return Ok(None);
        }

        self.run_check(check, task.trigger).await.map(Some)
    }

    /// Run `check` on this worker without claiming a task.
    pub async fn run_check(&self, check: Check, trigger: TriggerType) -> Result<RunOutcome, RunError> {
        let mut pool = self.pool.lock().await;
        self.orchestrator
            .perform(Arc::new(check), trigger, &mut pool)
            .await
    }

    /// Close the cached browser. Call before the process exits.
    pub async fn shutdown(&self) {
        tracing::debug!("worker shutting down");
        self.pool.lock().await.teardown().await;
    }
}
