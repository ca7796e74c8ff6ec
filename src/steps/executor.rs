//! Depth-first execution of a [`StepTree`].
//!
//! Each node is checked against the run deadline before its body runs. A
//! child subtree runs on a cloned state whose results are merged back before
//! the next sibling starts, and the first non-success child stops its
//! siblings. Container steps take their children's status; other steps
//! succeed on their own and pass a failing child's status up.

use futures::FutureExt;
use futures::future::BoxFuture;

use super::state::ExecutionState;
use super::status::StepStatus;
use super::tree::{StepId, StepTree};
use super::{StepCall, describe, execute as execute_body};
use crate::run::RunContext;

/// Execute the whole tree and return the run status.
///
/// When the deadline passed during the run, steps that never started are
/// marked `TIMEOUT`.
pub async fn execute(tree: &mut StepTree, ctx: &mut RunContext, mut state: ExecutionState) -> StepStatus {
    let root = tree.root();
    let status = execute_node(tree, root, ctx, &mut state).await;

    if ctx.deadline().is_expired() {
        let marked = tree.mark_unvisited(StepStatus::Timeout);
        if marked > 0 {
            tracing::debug!(run = %ctx.timestamp_id, marked, "marked unvisited steps as timed out");
        }
    }
    status
}

fn execute_node<'a>(
    tree: &'a mut StepTree,
    id: StepId,
    ctx: &'a mut RunContext,
    state: &'a mut ExecutionState,
) -> BoxFuture<'a, StepStatus> {
    async move {
        let kind = tree.kind(id);
        let logger = ctx.log.step(tree.breadcrumb(id));

        if ctx.deadline().is_expired() {
            logger.error("Timeout reached before step could run");
            tree.set_status(id, StepStatus::Timeout);
            return StepStatus::Timeout;
        }

        tree.set_status(id, StepStatus::Running);
        let config = tree.config(id);
        logger.info(format!("Starting {}", kind.id()));
        logger.info(describe(kind, &config));

        let call = StepCall {
            kind,
            config: &config,
            parent: tree.parent(id).map(|parent| tree.kind(parent)),
            logger: &logger,
        };
        if let Some(status) = execute_body(&call, ctx, state).await {
            tree.set_status(id, status);
            return status;
        }

        if !kind.is_container() {
            tree.set_status(id, StepStatus::Success);
        }

        let mut child_status = StepStatus::Success;
        for child in tree.children(id).to_vec() {
            let mut child_state = state.clone_to_child();
            child_status = execute_node(tree, child, ctx, &mut child_state).await;
            state.integrate_from_child(child_state);
            if !child_status.is_success() {
                break;
            }
        }

        if kind.is_container() {
            tree.set_status(id, child_status);
        }
        child_status
    }
    .boxed()
}
