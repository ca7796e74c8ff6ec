//! `example-plugin`: shows what a callable plugin can do.
//!
//! ```yaml
//! - call_plugin:
//!     example-plugin:
//!       example_argument: fail
//! ```

use serde_json::{Map, Value};

use super::{CallablePlugin, PluginCall};

/// Variable created on first call and reported on later ones.
pub const EXAMPLE_VARIABLE: &str = "variable_set_by_example_plugin";

#[derive(Debug, Default, Clone, Copy)]
pub struct ExamplePlugin;

impl CallablePlugin for ExamplePlugin {
    fn name(&self) -> &str {
        "example-plugin"
    }

    fn handle_call(&self, call: &mut PluginCall<'_>, args: &Map<String, Value>) -> anyhow::Result<()> {
        let argument = args.get("example_argument").cloned().unwrap_or(Value::Null);
        call.logger()
            .debug(format!("Called callable plugin. Called with {}", argument));

        if argument.as_str() == Some("fail") {
            call.mark_step_as_failed();
        }

        if let Some(value) = call.attributes().get("example_attribute") {
            call.logger()
                .info(format!("Check has attribute \"example_attribute\": {}", value));
        }

        match call.variables().get(EXAMPLE_VARIABLE).cloned() {
            Some(existing) => call.logger().info(format!(
                "Variable {} already set to value: {}",
                EXAMPLE_VARIABLE, existing
            )),
            None => {
                call.logger()
                    .info(format!("Setting variable {} to: created_value", EXAMPLE_VARIABLE));
                call.set_variable(EXAMPLE_VARIABLE, Value::String("created_value".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::RunLog;
    use crate::steps::variables::Variables;
    use serde_json::json;

    fn call_with(args: Value, variables: &mut Variables, log: &RunLog) -> bool {
        let logger = log.step("Root -> CallPlugin".to_string());
        let mut attributes = Map::new();
        attributes.insert("example_attribute".into(), json!("yes"));
        let mut call = PluginCall::new("c", &attributes, variables, &logger);
        ExamplePlugin
            .handle_call(&mut call, args.as_object().unwrap())
            .unwrap();
        call.step_failed()
    }

    #[test]
    fn test_fail_argument_marks_step() {
        let log = RunLog::new("t");
        let mut variables = Variables::new();
        assert!(call_with(json!({"example_argument": "fail"}), &mut variables, &log));
        assert!(!call_with(json!({"example_argument": "ok"}), &mut variables, &log));
    }

    #[test]
    fn test_variable_created_once() {
        let log = RunLog::new("t");
        let mut variables = Variables::new();
        call_with(json!({}), &mut variables, &log);
        assert_eq!(variables.get(EXAMPLE_VARIABLE), Some(&json!("created_value")));

        call_with(json!({}), &mut variables, &log);
        assert!(log.contents().contains("already set to value"));
        assert!(log.contents().contains("Check has attribute"));
    }
}
