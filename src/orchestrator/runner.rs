use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::browser::{BrowserPool, BrowserSession};
use crate::check::{Check, RunOutcome, TriggerType};
use crate::config::WorkerConfig;
use crate::errors::RunError;
use crate::plugins::PluginRegistry;
use crate::run::RunContext;
use crate::steps::executor;
use crate::steps::{ClientType, ExecutionState, StepStatus, StepTree, TransportSet};
use crate::store::{ArtifactStore, MetricsSink, RunStore};

use super::finalize::Finalizer;

/// Name of the screenshot taken when a browser run fails.
pub const FAILURE_SCREENSHOT: &str = "failure.png";

/// Runs one check from start to finish.
pub struct RunOrchestrator {
    config: Arc<WorkerConfig>,
    runs: Arc<dyn RunStore>,
    plugins: Arc<PluginRegistry>,
    http: reqwest::Client,
    finalizer: Finalizer,
}

impl RunOrchestrator {
    pub fn new(
        config: Arc<WorkerConfig>,
        runs: Arc<dyn RunStore>,
        artifacts: Arc<dyn ArtifactStore>,
        metrics: Arc<dyn MetricsSink>,
        plugins: Arc<PluginRegistry>,
    ) -> Self {
        let finalizer = Finalizer {
            runs: Arc::clone(&runs),
            artifacts,
            metrics,
            plugins: Arc::clone(&plugins),
        };
        Self {
            config,
            runs,
            plugins,
            http: reqwest::Client::new(),
            finalizer,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Build and validate the step tree of `check`.
    pub fn prepare(&self, check: &Check) -> Result<(StepTree, TransportSet), RunError> {
        let tree = StepTree::build(&check.steps);
        tree.validate(&self.plugins).map_err(|errors| RunError::Validation {
            check: check.name.clone(),
            errors,
        })?;
        let transports = tree.supported_transports();
        if transports.is_empty() {
            return Err(RunError::NoSupportedTransport(check.name.clone()));
        }
        Ok((tree, transports))
    }

    /// Execute `check` once and finalize its run.
    ///
    /// The run is always finalized with a terminal status, even when the
    /// steps are invalid or execution panics. Only store failures while
    /// creating or finishing the run are returned as errors.
    pub async fn perform(
        &self,
        check: Arc<Check>,
        trigger: TriggerType,
        pool: &mut BrowserPool,
    ) -> Result<RunOutcome, RunError> {
        let run = self
            .runs
            .create_run(&check, trigger)
            .await
            .map_err(RunError::Store)?;
        tracing::info!(
            check = %check.name,
            environment = %check.environment,
            run = %run.timestamp_id,
            %trigger,
            "starting run"
        );

        let mut ctx = RunContext::new(
            Arc::clone(&check),
            run.timestamp_id.clone(),
            check.timeout(&self.config.checks),
            self.http.clone(),
            Arc::clone(&self.plugins),
        );

        let mut tree = None;
        let result = AssertUnwindSafe(self.prepare_and_execute(&check, &mut tree, &mut ctx, pool))
            .catch_unwind()
            .await;
        let status = match result {
            Ok(status) => status,
            Err(panic) => {
                let message = panic_to_string(panic);
                tracing::error!(check = %check.name, run = %ctx.timestamp_id, panic = %message, "run panicked");
                ctx.log.error(format!("Internal error: {}", message));
                if let Some(tree) = tree.as_mut() {
                    tree.mark_running(StepStatus::InternalError);
                }
                pool.release(StepStatus::InternalError).await;
                StepStatus::InternalError
            }
        };
        self.finalizer.finish(&run, &ctx, tree.as_ref(), status).await
    }

    /// Validate the check and run its steps. The built tree is left in
    /// `slot` so it can be uploaded however execution ends.
    async fn prepare_and_execute(
        &self,
        check: &Check,
        slot: &mut Option<StepTree>,
        ctx: &mut RunContext,
        pool: &mut BrowserPool,
    ) -> StepStatus {
        let (tree, transports) = match self.prepare(check) {
            Ok(prepared) => prepared,
            Err(err) => {
                ctx.log.error(err.to_string());
                return StepStatus::Failed;
            }
        };
        let tree = slot.insert(tree);
        self.execute(check, tree, ctx, transports, pool).await
    }

    async fn execute(
        &self,
        check: &Check,
        tree: &mut StepTree,
        ctx: &mut RunContext,
        transports: TransportSet,
        pool: &mut BrowserPool,
    ) -> StepStatus {
        let Some(transport) = pool.select_transport(transports) else {
            ctx.log.error(format!("No transport available for {}", transports));
            return StepStatus::Failed;
        };
        ctx.log.info(format!("Running with {}", transport));

        let session = if transport == ClientType::Requests {
            None
        } else {
            match pool.acquire(transport).await {
                Ok(session) => Some(session),
                Err(err) => {
                    ctx.log.error(format!("Failed to start {}: {}", transport, err.summary()));
                    pool.release(StepStatus::Failed).await;
                    return StepStatus::Failed;
                }
            }
        };
        let state = match &session {
            Some(session) => ExecutionState::browser(Arc::clone(session)),
            None => ExecutionState::requests(),
        };

        ctx.start_timer();
        let status = executor::execute(tree, ctx, state).await;

        if let Some(session) = &session
            && status == StepStatus::Failed
            && check.screenshot_on_error(&self.config.checks)
        {
            capture_failure(session.as_ref(), ctx).await;
        }
        pool.release(status).await;
        status
    }
}

async fn capture_failure(session: &dyn BrowserSession, ctx: &mut RunContext) {
    match session.screenshot().await {
        Ok(png) => {
            ctx.log.info(format!("Saved screenshot {}", FAILURE_SCREENSHOT));
            ctx.register_artifact(FAILURE_SCREENSHOT, png);
        }
        Err(err) => ctx.log.warn(format!("Failed to take screenshot: {}", err.summary())),
    }
}

fn panic_to_string(panic: Box<dyn std::any::Any + Send + 'static>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserHandle, BrowserLauncher};
    use crate::config::BrowserSection;
    use crate::errors::BrowserError;
    use crate::store::{MemoryArtifactStore, MemoryMetricsSink, MemoryRunStore};
    use async_trait::async_trait;
    use crate::plugins::{CallablePlugin, PluginCall};
    use serde_json::{Map, Value, json};

    struct NoBrowsers;

    #[async_trait]
    impl BrowserLauncher for NoBrowsers {
        async fn launch(&self, kind: ClientType) -> Result<BrowserHandle, BrowserError> {
            Err(BrowserError::Launch {
                driver: kind.to_string(),
                message: "not available in tests".into(),
            })
        }
    }

    struct Explodes;

    impl CallablePlugin for Explodes {
        fn name(&self) -> &str {
            "explodes"
        }

        fn handle_call(&self, _call: &mut PluginCall<'_>, _args: &Map<String, Value>) -> anyhow::Result<()> {
            panic!("plugin blew up");
        }
    }

    fn setup() -> (RunOrchestrator, MemoryRunStore, MemoryArtifactStore, BrowserPool) {
        setup_with(PluginRegistry::default())
    }

    fn setup_with(
        plugins: PluginRegistry,
    ) -> (RunOrchestrator, MemoryRunStore, MemoryArtifactStore, BrowserPool) {
        let runs = MemoryRunStore::new();
        let artifacts = MemoryArtifactStore::new();
        let orchestrator = RunOrchestrator::new(
            Arc::new(WorkerConfig::default()),
            Arc::new(runs.clone()),
            Arc::new(artifacts.clone()),
            Arc::new(MemoryMetricsSink::new()),
            Arc::new(plugins),
        );
        let pool = BrowserPool::new(Arc::new(NoBrowsers), BrowserSection::default());
        (orchestrator, runs, artifacts, pool)
    }

    #[tokio::test]
    async fn test_invalid_steps_finalize_as_failed() {
        let (orchestrator, runs, artifacts, mut pool) = setup();
        let check = Arc::new(Check::new("bad", "prod", json!([{"goto": ""}])));

        let outcome = orchestrator
            .perform(check, TriggerType::Manual, &mut pool)
            .await
            .unwrap();

        assert_eq!(outcome.status, StepStatus::Failed);
        assert!(!outcome.success);
        assert_eq!(runs.runs().unwrap()[0].status, StepStatus::Failed);
        let log_key = format!("bad/prod/{}/artifact.log", outcome.timestamp_id);
        let log = String::from_utf8(artifacts.get_file(&log_key).await.unwrap()).unwrap();
        assert!(
            log.contains("Root -> GoTo: Goto value must contain a URL"),
            "log was: {}",
            log
        );
    }

    #[tokio::test]
    async fn test_browser_launch_failure_is_failed() {
        let (orchestrator, runs, _, mut pool) = setup();
        let check = Arc::new(Check::new(
            "browser",
            "prod",
            json!([{"goto": "http://127.0.0.1:9"}, {"find": [{"id": "x"}]}]),
        ));

        let outcome = orchestrator
            .perform(check, TriggerType::Manual, &mut pool)
            .await
            .unwrap();

        assert_eq!(outcome.status, StepStatus::Failed);
        assert!(pool.cached().is_none());
        assert_eq!(runs.runs().unwrap()[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_prepare_rejects_transport_conflict() {
        let (orchestrator, _, _, _) = setup();
        let check = Check::new(
            "conflict",
            "prod",
            json!([
                {"actions": [{"press": "enter"}, "report-performance"]}
            ]),
        );
        assert!(matches!(
            orchestrator.prepare(&check),
            Err(RunError::NoSupportedTransport(name)) if name == "conflict"
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_dns_timeout_finalizes_as_failed() {
        let (orchestrator, runs, _, mut pool) = setup();
        let check = Arc::new(Check::new(
            "dns",
            "prod",
            json!([{"dns": {"domain": "example.com", "timeout": 1e20}}]),
        ));

        let outcome = orchestrator
            .perform(check, TriggerType::Manual, &mut pool)
            .await
            .unwrap();

        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(runs.runs().unwrap()[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_panicking_plugin_finalizes_as_internal_error() {
        let (orchestrator, runs, artifacts, mut pool) =
            setup_with(PluginRegistry::new().with_callable(Explodes));
        let check = Arc::new(Check::new(
            "boom",
            "prod",
            json!([{"call_plugin": {"explodes": {}}}, {"goto": "http://127.0.0.1:9/"}]),
        ));

        let outcome = orchestrator
            .perform(check, TriggerType::Manual, &mut pool)
            .await
            .unwrap();

        assert_eq!(outcome.status, StepStatus::InternalError);
        assert_eq!(runs.runs().unwrap()[0].status, StepStatus::InternalError);

        let prefix = format!("boom/prod/{}/", outcome.timestamp_id);
        let log = artifacts.get_file(&format!("{}artifact.log", prefix)).await.unwrap();
        assert!(String::from_utf8(log).unwrap().contains("plugin blew up"));

        let data = artifacts.get_file(&format!("{}step-data.json", prefix)).await.unwrap();
        let snapshot: Value = serde_json::from_slice(&data).unwrap();
        let mut pending = vec![&snapshot];
        while let Some(node) = pending.pop() {
            assert_ne!(node["status"], "RUNNING", "node still running: {}", node["name"]);
            pending.extend(node["children"].as_array().unwrap());
        }
        assert_eq!(snapshot["status"], "INTERNAL_ERROR");
        assert_eq!(snapshot["children"][0]["status"], "INTERNAL_ERROR");
    }

    #[test]
    fn test_panic_to_string() {
        assert_eq!(panic_to_string(Box::new("boom")), "boom");
        assert_eq!(panic_to_string(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_to_string(Box::new(7_u8)), "unknown panic");
    }
}
