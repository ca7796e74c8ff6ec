//! Checks, runs and their outcomes.
//!
//! A check is usually authored as YAML:
//!
//! ```yaml
//! name: login
//! environment: prod
//! timeout: 30
//! attributes:
//!   notification_slack_channel: "#ops"
//! steps:
//!   - goto: https://example.com/login
//!   - find:
//!       - id: username
//!       - actions:
//!           - type: alice
//!   - check:
//!       url: https://example.com/home
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::ChecksSection;
use crate::steps::status::StepStatus;

/// Format of a run's timestamp identifier, also used as its artifact directory.
pub const TIMESTAMP_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

fn default_environment() -> String {
    "default".to_string()
}

fn default_enabled() -> bool {
    true
}

/// A named, environment-scoped step tree with execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub steps: Value,
    /// Schedule interval in seconds
    #[serde(default)]
    pub interval: Option<u64>,
    /// Run timeout in seconds; clamped to the worker's bounds
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Free-form attributes exposed to plugins
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub screenshot_on_error: Option<bool>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Check {
    pub fn new(name: impl Into<String>, environment: impl Into<String>, steps: Value) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            steps,
            interval: None,
            timeout: None,
            attributes: Map::new(),
            screenshot_on_error: None,
            enabled: true,
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse check YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read check file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid check file: {}", path.display()))
    }

    /// Effective run timeout.
    pub fn timeout(&self, bounds: &ChecksSection) -> Duration {
        let secs = self.timeout.unwrap_or(bounds.default_timeout_secs);
        let min = bounds.min_timeout_secs.min(bounds.max_timeout_secs);
        Duration::from_secs(secs.clamp(min, bounds.max_timeout_secs))
    }

    pub fn screenshot_on_error(&self, bounds: &ChecksSection) -> bool {
        self.screenshot_on_error
            .unwrap_or(bounds.screenshot_on_failure_default)
    }
}

/// What started a run. Only scheduled runs feed metrics and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Scheduled,
    Manual,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerType::Scheduled => write!(f, "scheduled"),
            TriggerType::Manual => write!(f, "manual"),
        }
    }
}

/// One execution of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: Uuid,
    pub check_name: String,
    pub environment: String,
    pub timestamp: DateTime<Local>,
    pub timestamp_id: String,
    pub trigger: TriggerType,
    pub status: StepStatus,
}

impl RunRecord {
    pub fn new(check: &Check, trigger: TriggerType) -> Self {
        let timestamp = Local::now();
        Self {
            id: Uuid::new_v4(),
            check_name: check.name.clone(),
            environment: check.environment.clone(),
            timestamp_id: timestamp.format(TIMESTAMP_ID_FORMAT).to_string(),
            timestamp,
            trigger,
            status: StepStatus::NotRun,
        }
    }

    /// Key prefix under which this run's artifacts are stored.
    pub fn artifact_prefix(&self) -> String {
        format!("{}/{}/{}/", self.check_name, self.environment, self.timestamp_id)
    }
}

/// Returned to the task queue when a run finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub timestamp_id: String,
    pub check: String,
    pub environment: String,
    pub status: StepStatus,
}

impl RunOutcome {
    pub fn from_run(run: &RunRecord, status: StepStatus) -> Self {
        Self {
            success: status.is_success(),
            timestamp_id: run.timestamp_id.clone(),
            check: run.check_name.clone(),
            environment: run.environment.clone(),
            status,
        }
    }
}
