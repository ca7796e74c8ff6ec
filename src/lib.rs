pub mod browser;
pub mod check;
pub mod claim;
pub mod config;
pub mod dns;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod plugins;
pub mod queue;
pub mod retry;
pub mod run;
pub mod steps;
pub mod store;
pub mod worker;

pub use check::{Check, RunOutcome, TriggerType};
pub use errors::{BrowserError, RunError, ValidationErrors};
pub use steps::StepStatus;
pub use worker::{CheckTask, Collaborators, WorkerContext};
