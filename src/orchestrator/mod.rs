//! Run lifecycle: build the step tree, pick a transport, execute, finalize.
//!
//! | Module     | Contents                                                    |
//! |------------|-------------------------------------------------------------|
//! | `runner`   | `RunOrchestrator`: validation, transport selection, execution |
//! | `finalize` | status persistence, artifact upload, metrics, notifications |
//!
//! Each run uploads under `{check}/{environment}/{timestamp_id}/`:
//!
//! ```text
//! step-data.json   nested step statuses
//! artifact.log     the run log
//! status          final status, e.g. SUCCESS
//! failure.png      browser runs that failed, when screenshots are enabled
//! ```

mod finalize;
pub mod runner;

pub use finalize::{LOG_ARTIFACT, STATUS_ARTIFACT, STEP_DATA_ARTIFACT};
pub use runner::{FAILURE_SCREENSHOT, RunOrchestrator};
