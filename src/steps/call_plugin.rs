//! `call_plugin`: run one or more registered callable plugins.
//!
//! ```yaml
//! - call_plugin:
//!     example-plugin:
//!       example_argument: example_value
//! ```

use serde_json::{Map, Value};

use super::StepCall;
use super::status::StepStatus;
use crate::plugins::{PluginCall, PluginRegistry};
use crate::run::RunContext;

pub(super) fn validate(config: &Value, plugins: &PluginRegistry) -> Vec<String> {
    let Some(map) = config.as_object().filter(|m| !m.is_empty()) else {
        return vec!["call_plugin must be a mapping of plugin names to arguments".to_string()];
    };

    let mut errors = Vec::new();
    for (name, args) in map {
        if plugins.callable(name).is_none() {
            let known = plugins.callable_names();
            errors.push(if known.is_empty() {
                format!("Plugin does not exist: {}", name)
            } else {
                format!("Plugin does not exist: {} (available: {})", name, known.join(", "))
            });
        }
        if !(args.is_object() || args.is_null()) {
            errors.push(format!("Arguments for plugin {} must be a mapping", name));
        }
    }
    errors
}

pub(super) fn describe(config: &Value) -> String {
    let names: Vec<&str> = config
        .as_object()
        .map(|m| m.keys().map(String::as_str).collect())
        .unwrap_or_default();
    format!("Call plugins: {}", names.join(", "))
}

/// Call each plugin in config order. A plugin error is logged and the next
/// plugin still runs.
pub(super) fn execute(call: &StepCall<'_>, ctx: &mut RunContext) -> Option<StepStatus> {
    let map = call.config.as_object()?;
    let check = ctx.check.clone();
    let plugins = ctx.plugins.clone();
    let no_args = Map::new();
    let mut failed = false;

    for (name, args) in map {
        let Some(plugin) = plugins.callable(name) else {
            call.logger.error(format!("Plugin does not exist: {}", name));
            failed = true;
            continue;
        };
        let args = args.as_object().unwrap_or(&no_args);

        let mut plugin_call = PluginCall::new(&check.name, &check.attributes, ctx.variables_mut(), call.logger);
        if let Err(err) = plugin.handle_call(&mut plugin_call, args) {
            call.logger
                .error(format!("Plugin ({}) call failed: {:#}", name, err));
        }
        failed |= plugin_call.step_failed();
    }

    failed.then_some(StepStatus::Failed)
}
