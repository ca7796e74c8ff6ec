//! Process-wide tracing setup and the per-run log.
//!
//! Every line written to a [`RunLog`] is also emitted as a tracing event, so
//! worker output and the uploaded `artifact.log` tell the same story.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Local;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects debug output for this
/// crate. `json` switches to one JSON object per line.
pub fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "synthmon=debug,info" } else { "info" })
    });

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialise tracing: {}", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// Text log buffer for one run, uploaded as `artifact.log` when the run ends.
///
/// Debug lines go to tracing only.
#[derive(Debug, Clone)]
pub struct RunLog {
    run: Arc<str>,
    buffer: Arc<Mutex<String>>,
}

impl RunLog {
    /// `run` labels the tracing events, e.g. `check/environment`.
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            run: Arc::from(run.into()),
            buffer: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Logger that prefixes every line with a step breadcrumb.
    pub fn step(&self, breadcrumb: String) -> StepLogger {
        StepLogger {
            log: self.clone(),
            prefix: breadcrumb,
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.record(Level::Debug, None, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.record(Level::Info, None, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.record(Level::Warn, None, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.record(Level::Error, None, message.as_ref());
    }

    /// Everything recorded so far.
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, level: Level, step: Option<&str>, message: &str) {
        let run = &*self.run;
        match (level, step) {
            (Level::Debug, Some(step)) => tracing::debug!(run, step, "{}", message),
            (Level::Debug, None) => tracing::debug!(run, "{}", message),
            (Level::Info, Some(step)) => tracing::info!(run, step, "{}", message),
            (Level::Info, None) => tracing::info!(run, "{}", message),
            (Level::Warn, Some(step)) => tracing::warn!(run, step, "{}", message),
            (Level::Warn, None) => tracing::warn!(run, "{}", message),
            (Level::Error, Some(step)) => tracing::error!(run, step, "{}", message),
            (Level::Error, None) => tracing::error!(run, "{}", message),
        }

        if level == Level::Debug {
            return;
        }

        let line = match step {
            Some(step) => format!(
                "{} - {} - {}: {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level.label(),
                step,
                message
            ),
            None => format!(
                "{} - {} - {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level.label(),
                message
            ),
        };
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_str(&line);
    }
}

/// A [`RunLog`] handle scoped to one step.
#[derive(Debug, Clone)]
pub struct StepLogger {
    log: RunLog,
    prefix: String,
}

impl StepLogger {
    pub fn breadcrumb(&self) -> &str {
        &self.prefix
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log.record(Level::Debug, Some(&self.prefix), message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log.record(Level::Info, Some(&self.prefix), message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log.record(Level::Warn, Some(&self.prefix), message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log.record(Level::Error, Some(&self.prefix), message.as_ref());
    }
}
