//! The closed set of step kinds and the static child-kind registry.

use serde_json::Value;

use super::transport::TransportSet;

/// Every directive a step tree can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Root,
    Goto,
    Find,
    Check,
    Actions,
    CallPlugin,
    Dns,
    CheckUrl,
    CheckTitle,
    CheckText,
    CheckBody,
    CheckJson,
    CheckResponse,
    CheckRecords,
    Click,
    Type,
    Press,
    Wait,
    Screenshot,
    ReportPerformance,
}

impl StepKind {
    /// Key that introduces this step in its parent's config.
    pub fn config_key(self) -> Option<&'static str> {
        Some(match self {
            StepKind::Root => return None,
            StepKind::Goto => "goto",
            StepKind::Find => "find",
            StepKind::Check => "check",
            StepKind::Actions => "actions",
            StepKind::CallPlugin => "call_plugin",
            StepKind::Dns => "dns",
            StepKind::CheckUrl => "url",
            StepKind::CheckTitle => "title",
            StepKind::CheckText => "text",
            StepKind::CheckBody => "body",
            StepKind::CheckJson => "json",
            StepKind::CheckResponse => "response",
            StepKind::CheckRecords => "records",
            StepKind::Click => "click",
            StepKind::Type => "type",
            StepKind::Press => "press",
            StepKind::Wait => "wait",
            StepKind::Screenshot => "screenshot",
            StepKind::ReportPerformance => "report-performance",
        })
    }

    /// Name used in breadcrumbs and step snapshots.
    pub fn id(self) -> &'static str {
        match self {
            StepKind::Root => "Root",
            StepKind::Goto => "GoTo",
            StepKind::Find => "Find",
            StepKind::Check => "Check",
            StepKind::Actions => "Actions",
            StepKind::CallPlugin => "CallPlugin",
            StepKind::Dns => "DNS",
            StepKind::CheckUrl => "CheckUrl",
            StepKind::CheckTitle => "CheckTitle",
            StepKind::CheckText => "CheckText",
            StepKind::CheckBody => "CheckBody",
            StepKind::CheckJson => "CheckJson",
            StepKind::CheckResponse => "CheckResponse",
            StepKind::CheckRecords => "CheckRecords",
            StepKind::Click => "Click",
            StepKind::Type => "Type",
            StepKind::Press => "Press",
            StepKind::Wait => "Wait",
            StepKind::Screenshot => "Screenshot",
            StepKind::ReportPerformance => "ReportPerformance",
        }
    }

    /// Kinds that may appear directly under this one, in matching order.
    pub fn child_kinds(self) -> &'static [StepKind] {
        match self {
            StepKind::Root => &[
                StepKind::Goto,
                StepKind::Find,
                StepKind::Check,
                StepKind::Actions,
                StepKind::CallPlugin,
                StepKind::Dns,
            ],
            StepKind::Find => &[StepKind::Find, StepKind::Actions, StepKind::Check],
            StepKind::Check => &[
                StepKind::CheckUrl,
                StepKind::CheckTitle,
                StepKind::CheckText,
                StepKind::CheckBody,
                StepKind::CheckJson,
                StepKind::CheckResponse,
                StepKind::CheckRecords,
            ],
            StepKind::Actions => &[
                StepKind::Click,
                StepKind::Type,
                StepKind::Press,
                StepKind::Wait,
                StepKind::Screenshot,
                StepKind::ReportPerformance,
            ],
            _ => &[],
        }
    }

    /// Child kind registered under `key`, if any.
    pub fn child_for_key(self, key: &str) -> Option<StepKind> {
        self.child_kinds()
            .iter()
            .copied()
            .find(|kind| kind.config_key() == Some(key))
    }

    /// Containers take their status from their children.
    pub fn is_container(self) -> bool {
        matches!(self, StepKind::Root | StepKind::Check | StepKind::Actions)
    }

    /// Transports able to run this step, given its config.
    pub fn supported_transports(self, config: &Value) -> TransportSet {
        match self {
            StepKind::Root | StepKind::Check | StepKind::CallPlugin | StepKind::CheckUrl => {
                TransportSet::ALL
            }
            StepKind::Goto if config.is_object() => TransportSet::REQUESTS,
            StepKind::Goto => TransportSet::ALL,
            StepKind::Dns
            | StepKind::CheckBody
            | StepKind::CheckJson
            | StepKind::CheckResponse
            | StepKind::CheckRecords => TransportSet::REQUESTS,
            StepKind::Find
            | StepKind::Actions
            | StepKind::CheckTitle
            | StepKind::CheckText
            | StepKind::Click
            | StepKind::Type
            | StepKind::Wait
            | StepKind::Screenshot => TransportSet::BROWSERS,
            StepKind::Press => TransportSet::FIREFOX,
            StepKind::ReportPerformance => TransportSet::CHROME,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Child steps declared by a step's config, in execution order.
///
/// List entries are matched against the registry in registry order; mapping
/// configs are matched in key order. Bare strings in an `actions` list name
/// config-less actions such as `click`.
pub fn child_configs(kind: StepKind, config: &Value) -> Vec<(StepKind, Value)> {
    if kind.child_kinds().is_empty() {
        return Vec::new();
    }

    let mut children = Vec::new();
    match config {
        Value::Array(entries) => {
            for entry in entries {
                match entry {
                    Value::Object(map) if kind == StepKind::Actions => {
                        for (key, value) in map {
                            if let Some(child) = kind.child_for_key(key) {
                                children.push((child, value.clone()));
                            }
                        }
                    }
                    Value::Object(map) => {
                        for child in kind.child_kinds() {
                            if let Some(key) = child.config_key()
                                && let Some(value) = map.get(key)
                            {
                                children.push((*child, value.clone()));
                            }
                        }
                    }
                    Value::String(name) if kind == StepKind::Actions => {
                        if let Some(child) = kind.child_for_key(name) {
                            children.push((child, Value::Null));
                        }
                    }
                    _ => {}
                }
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                if let Some(child) = kind.child_for_key(key) {
                    children.push((child, value.clone()));
                }
            }
        }
        _ => {}
    }
    children
}
