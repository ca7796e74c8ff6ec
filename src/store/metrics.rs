//! Result metrics, written once per scheduled run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::poisoned;
use crate::steps::status::StepStatus;

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_result(&self, check: &str, environment: &str, status: StepStatus) -> Result<()>;
}

/// Running totals for one check in one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckMetrics {
    pub total: u64,
    pub successes: u64,
    pub latest: StepStatus,
}

impl CheckMetrics {
    /// Fraction of successful runs, 0.0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successes as f64 / self.total as f64
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryMetricsSink {
    metrics: Arc<Mutex<HashMap<(String, String), CheckMetrics>>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, check: &str, environment: &str) -> Result<Option<CheckMetrics>> {
        let metrics = self.metrics.lock().map_err(poisoned)?;
        Ok(metrics.get(&(check.to_string(), environment.to_string())).copied())
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn record_result(&self, check: &str, environment: &str, status: StepStatus) -> Result<()> {
        let mut metrics = self.metrics.lock().map_err(poisoned)?;
        let entry = metrics
            .entry((check.to_string(), environment.to_string()))
            .or_default();
        entry.total += 1;
        if status.is_success() {
            entry.successes += 1;
        }
        entry.latest = status;
        Ok(())
    }
}
