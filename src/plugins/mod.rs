//! Plugin seams: callable plugins invoked from checks and notification plugins
//! invoked on run completion.
//!
//! | Module          | Contents                                           |
//! |-----------------|----------------------------------------------------|
//! | `example`       | `example-plugin`, a callable plugin demonstrating the call API |
//! | `notifications` | `NotificationPlugin`, `LogNotifier`, `WebhookNotifier` |

pub mod example;
pub mod notifications;

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::logging::StepLogger;
use crate::steps::variables::Variables;

pub use example::ExamplePlugin;
pub use notifications::{
    LogNotifier, NotificationMethod, NotificationPlugin, RunNotification, WebhookNotifier,
};

/// A plugin a check can call with `call_plugin`.
///
/// Arguments come verbatim from the check config. An error is logged to the
/// run and does not fail the step; call [`PluginCall::mark_step_as_failed`]
/// to fail it.
pub trait CallablePlugin: Send + Sync {
    /// Name used under `call_plugin` in checks.
    fn name(&self) -> &str;

    fn handle_call(&self, call: &mut PluginCall<'_>, args: &Map<String, Value>) -> anyhow::Result<()>;
}

/// What a callable plugin may see and change during a run.
pub struct PluginCall<'a> {
    check_name: &'a str,
    attributes: &'a Map<String, Value>,
    variables: &'a mut Variables,
    logger: &'a StepLogger,
    step_failed: bool,
}

impl<'a> PluginCall<'a> {
    pub fn new(
        check_name: &'a str,
        attributes: &'a Map<String, Value>,
        variables: &'a mut Variables,
        logger: &'a StepLogger,
    ) -> Self {
        Self {
            check_name,
            attributes,
            variables,
            logger,
            step_failed: false,
        }
    }

    pub fn check_name(&self) -> &str {
        self.check_name
    }

    /// Read-only check attributes.
    pub fn attributes(&self) -> &Map<String, Value> {
        self.attributes
    }

    pub fn variables(&self) -> &Variables {
        self.variables
    }

    /// Set a run variable, visible to every later step.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Fail the calling step once the plugin returns.
    pub fn mark_step_as_failed(&mut self) {
        self.step_failed = true;
    }

    pub fn step_failed(&self) -> bool {
        self.step_failed
    }

    /// Logger writing into the run log under the calling step.
    pub fn logger(&self) -> &StepLogger {
        self.logger
    }
}

/// Registered plugins, shared by every run of a worker.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    callables: Vec<Arc<dyn CallablePlugin>>,
    notifiers: Vec<Arc<dyn NotificationPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callable(mut self, plugin: impl CallablePlugin + 'static) -> Self {
        self.callables.push(Arc::new(plugin));
        self
    }

    pub fn with_notifier(mut self, plugin: impl NotificationPlugin + 'static) -> Self {
        self.notifiers.push(Arc::new(plugin));
        self
    }

    pub fn with_notifier_arc(mut self, plugin: Arc<dyn NotificationPlugin>) -> Self {
        self.notifiers.push(plugin);
        self
    }

    pub fn callable(&self, name: &str) -> Option<&Arc<dyn CallablePlugin>> {
        self.callables.iter().find(|p| p.name() == name)
    }

    pub fn callable_names(&self) -> Vec<&str> {
        self.callables.iter().map(|p| p.name()).collect()
    }

    pub fn notifiers(&self) -> &[Arc<dyn NotificationPlugin>] {
        &self.notifiers
    }

    /// Deliver one notification to every notifier. Failures are logged and skipped.
    pub async fn notify(&self, method: NotificationMethod, event: &RunNotification) {
        for plugin in &self.notifiers {
            if let Err(err) = method.dispatch(plugin.as_ref(), event).await {
                tracing::warn!(
                    plugin = plugin.name(),
                    method = method.as_str(),
                    error = %err,
                    "Failed to call notification plugin"
                );
            }
        }
    }

    /// Report queue-expired checks to every notifier.
    pub async fn notify_queue_timeout(&self, check_count: usize) {
        for plugin in &self.notifiers {
            if let Err(err) = plugin.on_check_queue_timeout(check_count).await {
                tracing::warn!(
                    plugin = plugin.name(),
                    error = %err,
                    "Failed to call on_check_queue_timeout for plugin"
                );
            }
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("callables", &self.callable_names())
            .field(
                "notifiers",
                &self.notifiers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
