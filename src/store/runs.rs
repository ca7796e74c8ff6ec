//! Checks and run records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use uuid::Uuid;

use super::poisoned;
use crate::check::{Check, RunRecord, TriggerType};
use crate::steps::status::StepStatus;

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load_check(&self, name: &str, environment: &str) -> Result<Option<Check>>;

    /// Record the start of a run.
    async fn create_run(&self, check: &Check, trigger: TriggerType) -> Result<RunRecord>;

    /// Set a run's final status. A run's status is set once.
    async fn set_run_status(&self, run_id: Uuid, status: StepStatus) -> Result<()>;

    /// Latest runs of a check, newest first.
    async fn recent_runs(&self, check: &str, environment: &str, limit: usize) -> Result<Vec<RunRecord>>;
}

/// Process-local run store.
#[derive(Debug, Default, Clone)]
pub struct MemoryRunStore {
    checks: Arc<Mutex<HashMap<(String, String), Check>>>,
    runs: Arc<Mutex<Vec<RunRecord>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a check.
    pub fn upsert_check(&self, check: Check) -> Result<()> {
        let mut checks = self.checks.lock().map_err(poisoned)?;
        checks.insert((check.name.clone(), check.environment.clone()), check);
        Ok(())
    }

    pub fn runs(&self) -> Result<Vec<RunRecord>> {
        Ok(self.runs.lock().map_err(poisoned)?.clone())
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn load_check(&self, name: &str, environment: &str) -> Result<Option<Check>> {
        let checks = self.checks.lock().map_err(poisoned)?;
        Ok(checks.get(&(name.to_string(), environment.to_string())).cloned())
    }

    async fn create_run(&self, check: &Check, trigger: TriggerType) -> Result<RunRecord> {
        let run = RunRecord::new(check, trigger);
        self.runs.lock().map_err(poisoned)?.push(run.clone());
        Ok(run)
    }

    async fn set_run_status(&self, run_id: Uuid, status: StepStatus) -> Result<()> {
        let mut runs = self.runs.lock().map_err(poisoned)?;
        let Some(run) = runs.iter_mut().find(|run| run.id == run_id) else {
            bail!("Run {} not found", run_id);
        };
        if run.status.is_terminal() {
            bail!("Run {} already finished with status {}", run_id, run.status);
        }
        run.status = status;
        Ok(())
    }

    async fn recent_runs(&self, check: &str, environment: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let runs = self.runs.lock().map_err(poisoned)?;
        Ok(runs
            .iter()
            .rev()
            .filter(|run| run.check_name == check && run.environment == environment)
            .take(limit)
            .cloned()
            .collect())
    }
}
