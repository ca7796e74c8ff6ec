//! Step and run status.

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by steps and runs.
///
/// `NotRun` → `Running` → one terminal status. A step may also go straight
/// from `NotRun` to `Timeout` when the run deadline had already passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    #[default]
    NotRun,
    Running,
    Success,
    Failed,
    Timeout,
    InternalError,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Timeout | StepStatus::InternalError
        )
    }

    pub fn is_success(self) -> bool {
        self == StepStatus::Success
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (_, StepStatus::NotRun) => false,
            (StepStatus::Running, StepStatus::Running) => false,
            _ => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::NotRun => "NOT_RUN",
            StepStatus::Running => "RUNNING",
            StepStatus::Success => "SUCCESS",
            StepStatus::Failed => "FAILED",
            StepStatus::Timeout => "TIMEOUT",
            StepStatus::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
