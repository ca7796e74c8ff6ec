//! One-off check execution - `synthmon run`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use synthmon::browser::WebDriverLauncher;
use synthmon::check::{Check, RunOutcome, TriggerType};
use synthmon::claim::MemoryClaimStore;
use synthmon::config::WorkerConfig;
use synthmon::plugins::{ExamplePlugin, LogNotifier, PluginRegistry, WebhookNotifier};
use synthmon::store::{LocalArtifactStore, MemoryMetricsSink, MemoryRunStore};
use synthmon::worker::{Collaborators, WorkerContext};

use crate::Cli;

/// Plugins available to checks run from the command line.
pub fn default_plugins() -> PluginRegistry {
    let mut plugins = PluginRegistry::new()
        .with_callable(ExamplePlugin)
        .with_notifier(LogNotifier);
    if let Some(webhook) = WebhookNotifier::from_env() {
        plugins = plugins.with_notifier(webhook);
    }
    plugins
}

pub async fn cmd_run(
    cli: &Cli,
    file: &Path,
    environment: Option<&str>,
    timeout: Option<u64>,
    scheduled: bool,
) -> Result<RunOutcome> {
    let config = WorkerConfig::load_or_default(cli.config.as_deref())?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let mut check = Check::load(file)?;
    if let Some(environment) = environment {
        check.environment = environment.to_string();
    }
    if timeout.is_some() {
        check.timeout = timeout;
    }

    let artifact_dir = config.artifacts.dir.clone();
    let launcher = WebDriverLauncher::new(config.browser.clone())
        .context("Failed to set up browser launcher")?;
    let worker = WorkerContext::new(
        config,
        Collaborators {
            runs: Arc::new(MemoryRunStore::new()),
            artifacts: Arc::new(LocalArtifactStore::new(&artifact_dir)),
            metrics: Arc::new(MemoryMetricsSink::new()),
            claims: Arc::new(MemoryClaimStore::new()),
        },
        default_plugins(),
        Arc::new(launcher),
    );

    let trigger = if scheduled {
        TriggerType::Scheduled
    } else {
        TriggerType::Manual
    };
    let result = worker.run_check(check, trigger).await;
    worker.shutdown().await;
    let outcome = result?;

    println!("{} ({}): {}", outcome.check, outcome.environment, outcome.status);
    println!(
        "Artifacts: {}",
        artifact_dir
            .join(&outcome.check)
            .join(&outcome.environment)
            .join(&outcome.timestamp_id)
            .display()
    );
    Ok(outcome)
}
