use std::sync::Arc;

use anyhow::Result;

use crate::check::{RunOutcome, RunRecord, TriggerType};
use crate::errors::RunError;
use crate::plugins::{NotificationMethod, PluginRegistry, RunNotification};
use crate::run::RunContext;
use crate::steps::{StepStatus, StepTree};
use crate::store::{ArtifactBody, ArtifactStore, MetricsSink, RunStore};

pub const STEP_DATA_ARTIFACT: &str = "step-data.json";
pub const LOG_ARTIFACT: &str = "artifact.log";
pub const STATUS_ARTIFACT: &str = "status";

/// Persists a finished run and tells everyone who cares.
pub(super) struct Finalizer {
    pub(super) runs: Arc<dyn RunStore>,
    pub(super) artifacts: Arc<dyn ArtifactStore>,
    pub(super) metrics: Arc<dyn MetricsSink>,
    pub(super) plugins: Arc<PluginRegistry>,
}

impl Finalizer {
    /// Record `status` for `run`, upload its artifacts and, for scheduled
    /// runs, write metrics and send notifications.
    ///
    /// Only a failure to store the status is returned; artifact, metric and
    /// notification failures are logged.
    pub(super) async fn finish(
        &self,
        run: &RunRecord,
        ctx: &RunContext,
        tree: Option<&StepTree>,
        status: StepStatus,
    ) -> Result<RunOutcome, RunError> {
        let status = if status.is_terminal() {
            status
        } else {
            tracing::error!(run = %run.timestamp_id, %status, "run ended without a terminal status");
            StepStatus::InternalError
        };
        ctx.log.info(format!("Run finished with status {}", status));

        self.runs
            .set_run_status(run.id, status)
            .await
            .map_err(RunError::Store)?;

        if let Err(err) = self.upload(run, ctx, tree, status).await {
            let error = format!("{:#}", err);
            tracing::warn!(run = %run.timestamp_id, %error, "failed to upload run artifacts");
        }

        if run.trigger == TriggerType::Scheduled {
            if let Err(err) = self
                .metrics
                .record_result(&run.check_name, &run.environment, status)
                .await
            {
                tracing::warn!(run = %run.timestamp_id, error = %err, "failed to record metrics");
            }
            if let Err(err) = self.notify(run, ctx, status).await {
                tracing::warn!(run = %run.timestamp_id, error = %err, "failed to send notifications");
            }
        }

        tracing::info!(
            check = %run.check_name,
            environment = %run.environment,
            run = %run.timestamp_id,
            %status,
            "run finished"
        );
        Ok(RunOutcome::from_run(run, status))
    }

    async fn upload(
        &self,
        run: &RunRecord,
        ctx: &RunContext,
        tree: Option<&StepTree>,
        status: StepStatus,
    ) -> Result<()> {
        let prefix = run.artifact_prefix();

        if let Some(tree) = tree {
            let snapshot = serde_json::to_vec_pretty(&tree.snapshot())?;
            self.artifacts
                .upload_file(&format!("{}{}", prefix, STEP_DATA_ARTIFACT), snapshot.into())
                .await?;
        }
        self.artifacts
            .upload_file(&format!("{}{}", prefix, LOG_ARTIFACT), ctx.log.contents().into())
            .await?;
        self.artifacts
            .upload_file(
                &format!("{}{}", prefix, STATUS_ARTIFACT),
                status.as_str().to_string().into(),
            )
            .await?;

        for artifact in ctx.artifacts() {
            self.artifacts
                .upload_file(
                    &format!("{}{}", prefix, artifact.name),
                    ArtifactBody::Content(artifact.content.clone()),
                )
                .await?;
        }
        Ok(())
    }

    async fn notify(&self, run: &RunRecord, ctx: &RunContext, status: StepStatus) -> Result<()> {
        let recent = self
            .runs
            .recent_runs(&run.check_name, &run.environment, 2)
            .await?;
        let is_new_state = match recent.as_slice() {
            [_, previous] => previous.status != status,
            _ => true,
        };

        let event = RunNotification {
            check_name: run.check_name.clone(),
            environment_name: run.environment.clone(),
            run_status: status,
            run_timestamp: run.timestamp,
            run_log: ctx.log.contents(),
            attributes: ctx.check.attributes.clone(),
        };
        for method in NotificationMethod::for_transition(status, is_new_state) {
            self.plugins.notify(method, &event).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::Check;
    use crate::plugins::NotificationPlugin;
    use crate::store::{MemoryArtifactStore, MemoryMetricsSink, MemoryRunStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        fn push(&self, method: &str) {
            self.calls.lock().unwrap().push(method.to_string());
        }
    }

    #[async_trait]
    impl NotificationPlugin for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn on_complete(&self, _event: &RunNotification) -> Result<()> {
            self.push("on_complete");
            Ok(())
        }

        async fn on_first_failure(&self, event: &RunNotification) -> Result<()> {
            assert_eq!(event.attributes["team"], "ops");
            self.push("on_first_failure");
            Ok(())
        }

        async fn on_every_failure(&self, _event: &RunNotification) -> Result<()> {
            self.push("on_every_failure");
            Ok(())
        }

        async fn on_first_success(&self, _event: &RunNotification) -> Result<()> {
            self.push("on_first_success");
            Ok(())
        }

        async fn on_every_success(&self, _event: &RunNotification) -> Result<()> {
            self.push("on_every_success");
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl NotificationPlugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn on_complete(&self, _event: &RunNotification) -> Result<()> {
            anyhow::bail!("webhook down")
        }

        async fn on_first_failure(&self, _event: &RunNotification) -> Result<()> {
            anyhow::bail!("webhook down")
        }

        async fn on_every_failure(&self, _event: &RunNotification) -> Result<()> {
            anyhow::bail!("webhook down")
        }
    }

    struct Fixture {
        finalizer: Finalizer,
        runs: MemoryRunStore,
        artifacts: MemoryArtifactStore,
        metrics: MemoryMetricsSink,
        recorder: Arc<Recorder>,
        check: Arc<Check>,
    }

    fn fixture() -> Fixture {
        fixture_with(PluginRegistry::new())
    }

    fn fixture_with(plugins: PluginRegistry) -> Fixture {
        let runs = MemoryRunStore::new();
        let artifacts = MemoryArtifactStore::new();
        let metrics = MemoryMetricsSink::new();
        let recorder = Arc::new(Recorder::default());
        let plugins = plugins.with_notifier_arc(recorder.clone());
        let mut check = Check::new("login", "prod", json!([]));
        check.attributes.insert("team".into(), json!("ops"));
        Fixture {
            finalizer: Finalizer {
                runs: Arc::new(runs.clone()),
                artifacts: Arc::new(artifacts.clone()),
                metrics: Arc::new(metrics.clone()),
                plugins: Arc::new(plugins),
            },
            runs,
            artifacts,
            metrics,
            recorder,
            check: Arc::new(check),
        }
    }

    async fn finish(fx: &Fixture, trigger: TriggerType, status: StepStatus) -> RunOutcome {
        let run = fx.runs.create_run(&fx.check, trigger).await.unwrap();
        let ctx = RunContext::new(
            Arc::clone(&fx.check),
            run.timestamp_id.clone(),
            Duration::from_secs(5),
            reqwest::Client::new(),
            Arc::new(PluginRegistry::default()),
        );
        fx.finalizer.finish(&run, &ctx, None, status).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_and_every_notifications() {
        let fx = fixture();

        finish(&fx, TriggerType::Scheduled, StepStatus::Failed).await;
        assert_eq!(
            fx.recorder.take(),
            vec!["on_complete", "on_every_failure", "on_first_failure"]
        );

        finish(&fx, TriggerType::Scheduled, StepStatus::Failed).await;
        assert_eq!(fx.recorder.take(), vec!["on_complete", "on_every_failure"]);

        finish(&fx, TriggerType::Scheduled, StepStatus::Success).await;
        assert_eq!(
            fx.recorder.take(),
            vec!["on_complete", "on_every_success", "on_first_success"]
        );
    }

    #[tokio::test]
    async fn test_failing_notifier_does_not_block_delivery() {
        let fx = fixture_with(PluginRegistry::new().with_notifier(Broken));

        let outcome = finish(&fx, TriggerType::Scheduled, StepStatus::Failed).await;

        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(
            fx.recorder.take(),
            vec!["on_complete", "on_every_failure", "on_first_failure"]
        );
    }

    #[tokio::test]
    async fn test_manual_runs_skip_metrics_and_notifications() {
        let fx = fixture();
        let outcome = finish(&fx, TriggerType::Manual, StepStatus::Success).await;

        assert!(outcome.success);
        assert!(fx.recorder.take().is_empty());
        assert!(fx.metrics.get("login", "prod").unwrap().is_none());
        assert_eq!(fx.runs.runs().unwrap()[0].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_scheduled_run_records_metrics() {
        let fx = fixture();
        finish(&fx, TriggerType::Scheduled, StepStatus::Timeout).await;

        let metrics = fx.metrics.get("login", "prod").unwrap().unwrap();
        assert_eq!(metrics.total, 1);
        assert_eq!(metrics.latest, StepStatus::Timeout);
    }

    #[tokio::test]
    async fn test_uploads_log_and_status() {
        let fx = fixture();
        let outcome = finish(&fx, TriggerType::Manual, StepStatus::Failed).await;

        let prefix = format!("login/prod/{}/", outcome.timestamp_id);
        let keys = fx.artifacts.list_files(&prefix).await.unwrap();
        assert_eq!(
            keys,
            vec![format!("{}artifact.log", prefix), format!("{}status", prefix)]
        );
        let status = fx.artifacts.get_file(&format!("{}status", prefix)).await.unwrap();
        assert_eq!(status, b"FAILED");
        let log = fx.artifacts.get_file(&format!("{}artifact.log", prefix)).await.unwrap();
        assert!(String::from_utf8(log).unwrap().contains("Run finished with status FAILED"));
    }

    #[tokio::test]
    async fn test_non_terminal_status_becomes_internal_error() {
        let fx = fixture();
        let outcome = finish(&fx, TriggerType::Manual, StepStatus::Running).await;
        assert_eq!(outcome.status, StepStatus::InternalError);
    }
}
