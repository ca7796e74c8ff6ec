//! Per-run execution context: deadline, variables, artifacts and log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::check::Check;
use crate::logging::RunLog;
use crate::plugins::PluginRegistry;
use crate::steps::variables::Variables;

/// Run deadline. Not expired until [`Deadline::start`] is called.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Option<Instant>,
    timeout: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started: None,
            timeout,
        }
    }

    /// Start the clock now.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left, or the full timeout when not started.
    pub fn remaining(&self) -> Duration {
        match self.started {
            Some(started) => self.timeout.saturating_sub(started.elapsed()),
            None => self.timeout,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.started.is_some() && self.remaining().is_zero()
    }
}

/// A file produced by a step, uploaded under the run's artifact prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub content: Vec<u8>,
}

/// Everything a step needs besides its own config and the transport state.
pub struct RunContext {
    pub check: Arc<Check>,
    pub timestamp_id: String,
    pub log: RunLog,
    pub http: reqwest::Client,
    pub plugins: Arc<PluginRegistry>,
    deadline: Deadline,
    variables: Variables,
    artifacts: Vec<Artifact>,
}

impl RunContext {
    pub fn new(
        check: Arc<Check>,
        timestamp_id: String,
        timeout: Duration,
        http: reqwest::Client,
        plugins: Arc<PluginRegistry>,
    ) -> Self {
        let log = RunLog::new(format!("{}/{}", check.name, check.environment));
        Self {
            check,
            timestamp_id,
            log,
            http,
            plugins,
            deadline: Deadline::new(timeout),
            variables: Variables::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn start_timer(&mut self) {
        self.deadline.start();
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Keep a file for upload. A later artifact with the same name replaces the earlier one.
    pub fn register_artifact(&mut self, name: impl Into<String>, content: Vec<u8>) {
        let name = name.into();
        self.artifacts.retain(|a| a.name != name);
        self.artifacts.push(Artifact { name, content });
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }
}
