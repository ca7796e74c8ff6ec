//! The step-tree interpreter.
//!
//! A check's `steps` config is built into a [`StepTree`], validated in one
//! pass, and executed depth-first by [`executor::execute`]. Each step kind
//! lives in its own module exposing `validate`, `describe` and `execute`;
//! this module dispatches on [`StepKind`].
//!
//! ```yaml
//! steps:
//!   - goto: https://example.com/login
//!   - find:
//!     - id: username
//!     - actions:
//!       - type: "{username}"
//!   - check:
//!       url: https://example.com/home
//! ```

pub mod actions;
pub mod call_plugin;
pub mod checks;
pub mod dns;
pub mod executor;
pub mod find;
pub mod goto;
pub mod kind;
pub mod selector;
pub mod state;
pub mod status;
pub mod transport;
pub mod tree;
pub mod variables;

use serde_json::Value;

use crate::logging::StepLogger;
use crate::plugins::PluginRegistry;
use crate::run::RunContext;

pub use kind::StepKind;
pub use state::ExecutionState;
pub use status::StepStatus;
pub use transport::{ClientType, TransportSet};
pub use tree::{StepId, StepTree};

/// One step invocation, as seen by a step body.
pub(crate) struct StepCall<'a> {
    pub kind: StepKind,
    pub config: &'a Value,
    /// Kind of the enclosing step; `None` for the root.
    pub parent: Option<StepKind>,
    pub logger: &'a StepLogger,
}

/// Outcome for a step whose body cannot run on the run's transport.
pub(crate) fn unsupported(call: &StepCall<'_>) -> Option<StepStatus> {
    call.logger
        .error(format!("{} step cannot run on the selected transport", call.kind.id()));
    Some(StepStatus::Failed)
}

/// An error and its sources joined with `: `.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Shape problems with a single step's own config. Children are checked separately.
pub(crate) fn validate(kind: StepKind, config: &Value, plugins: &PluginRegistry) -> Vec<String> {
    match kind {
        StepKind::Root => match config {
            Value::Array(_) => Vec::new(),
            _ => vec!["Steps must be a list".to_string()],
        },
        StepKind::Goto => goto::validate(config),
        StepKind::Find => find::validate(config),
        StepKind::CallPlugin => call_plugin::validate(config, plugins),
        StepKind::Dns => dns::validate(config),
        StepKind::Check
        | StepKind::CheckUrl
        | StepKind::CheckTitle
        | StepKind::CheckText
        | StepKind::CheckBody
        | StepKind::CheckJson
        | StepKind::CheckResponse
        | StepKind::CheckRecords => checks::validate(kind, config),
        StepKind::Actions
        | StepKind::Click
        | StepKind::Type
        | StepKind::Press
        | StepKind::Wait
        | StepKind::Screenshot
        | StepKind::ReportPerformance => actions::validate(kind, config),
    }
}

/// One-line description logged when the step starts.
pub(crate) fn describe(kind: StepKind, config: &Value) -> String {
    match kind {
        StepKind::Root => "Check root".to_string(),
        StepKind::Goto => goto::describe(config),
        StepKind::Find => find::describe(config),
        StepKind::CallPlugin => call_plugin::describe(config),
        StepKind::Dns => dns::describe(config),
        StepKind::Check
        | StepKind::CheckUrl
        | StepKind::CheckTitle
        | StepKind::CheckText
        | StepKind::CheckBody
        | StepKind::CheckJson
        | StepKind::CheckResponse
        | StepKind::CheckRecords => checks::describe(kind, config),
        StepKind::Actions
        | StepKind::Click
        | StepKind::Type
        | StepKind::Press
        | StepKind::Wait
        | StepKind::Screenshot
        | StepKind::ReportPerformance => actions::describe(kind, config),
    }
}

/// Run a step's own body.
///
/// `None` lets execution continue into the children; `Some` is the step's
/// final status and its children are skipped.
pub(crate) async fn execute(
    call: &StepCall<'_>,
    ctx: &mut RunContext,
    state: &mut ExecutionState,
) -> Option<StepStatus> {
    match call.kind {
        StepKind::Root => None,
        StepKind::Goto => goto::execute(call, ctx, state).await,
        StepKind::Find => find::execute(call, ctx, state).await,
        StepKind::CallPlugin => call_plugin::execute(call, ctx),
        StepKind::Dns => dns::execute(call, ctx, state).await,
        StepKind::Check
        | StepKind::CheckUrl
        | StepKind::CheckTitle
        | StepKind::CheckText
        | StepKind::CheckBody
        | StepKind::CheckJson
        | StepKind::CheckResponse
        | StepKind::CheckRecords => checks::execute(call, ctx, state).await,
        StepKind::Actions
        | StepKind::Click
        | StepKind::Type
        | StepKind::Press
        | StepKind::Wait
        | StepKind::Screenshot
        | StepKind::ReportPerformance => actions::execute(call, ctx, state).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn test_error_chain_joins_sources() {
        let err = Outer(std::io::Error::other("connection refused"));
        assert_eq!(error_chain(&err), "outer: connection refused");
    }

    #[test]
    fn test_root_must_be_list() {
        let plugins = PluginRegistry::default();
        assert!(validate(StepKind::Root, &json!([]), &plugins).is_empty());
        assert_eq!(
            validate(StepKind::Root, &json!({"goto": "x"}), &plugins),
            vec!["Steps must be a list".to_string()]
        );
    }

    #[test]
    fn test_describe_dispatch() {
        assert_eq!(describe(StepKind::Root, &Value::Null), "Check root");
        assert!(describe(StepKind::Goto, &json!("https://example.com")).contains("https://example.com"));
    }
}
