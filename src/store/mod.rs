//! Collaborators the engine persists through.
//!
//! | Trait           | Purpose                                   | In-process impl        |
//! |-----------------|-------------------------------------------|------------------------|
//! | `RunStore`      | checks and run records                    | `MemoryRunStore`       |
//! | `ArtifactStore` | step data, run logs, screenshots          | `LocalArtifactStore`, `MemoryArtifactStore` |
//! | `MetricsSink`   | per-check result metrics (scheduled runs) | `MemoryMetricsSink`    |

pub mod artifacts;
pub mod metrics;
pub mod runs;

pub use artifacts::{ArtifactBody, ArtifactStore, LocalArtifactStore, MemoryArtifactStore};
pub use metrics::{CheckMetrics, MemoryMetricsSink, MetricsSink};
pub use runs::{MemoryRunStore, RunStore};

/// Map a poisoned lock into an error instead of panicking.
pub(crate) fn poisoned<T>(err: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow::anyhow!("store lock poisoned: {}", err)
}
