//! Arena-backed step tree.
//!
//! Nodes are stored in pre-order, so iterating the arena visits steps in the
//! order they execute. Parents are referenced by index. Once built, only the
//! node statuses change.

use std::sync::Arc;

use serde_json::{Value, json};

use super::kind::{StepKind, child_configs};
use super::status::StepStatus;
use super::transport::TransportSet;
use crate::errors::{StepValidationError, ValidationErrors};
use crate::plugins::PluginRegistry;

/// Index of a node in its [`StepTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(usize);

#[derive(Debug)]
struct StepNode {
    kind: StepKind,
    config: Arc<Value>,
    parent: Option<StepId>,
    children: Vec<StepId>,
    status: StepStatus,
    transports: TransportSet,
}

#[derive(Debug)]
pub struct StepTree {
    nodes: Vec<StepNode>,
}

impl StepTree {
    /// Build the tree for a check's `steps` config.
    ///
    /// Keys that are not registered children of a step are skipped.
    pub fn build(steps: &Value) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.add(StepKind::Root, steps.clone(), None);
        tree
    }

    fn add(&mut self, kind: StepKind, config: Value, parent: Option<StepId>) -> StepId {
        let id = StepId(self.nodes.len());
        let children = child_configs(kind, &config);
        self.nodes.push(StepNode {
            kind,
            transports: kind.supported_transports(&config),
            config: Arc::new(config),
            parent,
            children: Vec::with_capacity(children.len()),
            status: StepStatus::NotRun,
        });
        for (child_kind, child_config) in children {
            let child = self.add(child_kind, child_config, Some(id));
            self.nodes[id.0].children.push(child);
        }
        id
    }

    pub fn root(&self) -> StepId {
        StepId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Every node in pre-order.
    pub fn ids(&self) -> impl Iterator<Item = StepId> + '_ {
        (0..self.nodes.len()).map(StepId)
    }

    pub fn kind(&self, id: StepId) -> StepKind {
        self.nodes[id.0].kind
    }

    pub fn config(&self, id: StepId) -> Arc<Value> {
        Arc::clone(&self.nodes[id.0].config)
    }

    pub fn parent(&self, id: StepId) -> Option<StepId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: StepId) -> &[StepId] {
        &self.nodes[id.0].children
    }

    pub fn status(&self, id: StepId) -> StepStatus {
        self.nodes[id.0].status
    }

    /// `Root -> Find -> Actions -> Type`
    pub fn breadcrumb(&self, id: StepId) -> String {
        let mut names = vec![self.kind(id).id()];
        let mut current = self.parent(id);
        while let Some(parent) = current {
            names.push(self.kind(parent).id());
            current = self.parent(parent);
        }
        names.reverse();
        names.join(" -> ")
    }

    /// Check every node, collecting all problems.
    pub fn validate(&self, plugins: &PluginRegistry) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        for id in self.ids() {
            let node = &self.nodes[id.0];
            let messages = super::validate(node.kind, &node.config, plugins);
            if messages.is_empty() {
                continue;
            }
            let path = self.breadcrumb(id);
            for message in messages {
                errors.push(StepValidationError::new(path.clone(), message));
            }
        }
        errors.into_result()
    }

    /// Transports accepted by every step in the tree.
    pub fn supported_transports(&self) -> TransportSet {
        self.nodes
            .iter()
            .fold(TransportSet::ALL, |set, node| set.intersect(node.transports))
    }

    /// Move a node to `status`. Returns false and leaves the node untouched
    /// when the transition is not allowed.
    pub fn set_status(&mut self, id: StepId, status: StepStatus) -> bool {
        let node = &mut self.nodes[id.0];
        if !node.status.can_transition_to(status) {
            tracing::debug!(
                step = node.kind.id(),
                from = %node.status,
                to = %status,
                "ignoring step status transition"
            );
            return false;
        }
        node.status = status;
        true
    }

    /// Set every node that never started to `status`.
    pub fn mark_unvisited(&mut self, status: StepStatus) -> usize {
        let mut marked = 0;
        for node in &mut self.nodes {
            if node.status == StepStatus::NotRun {
                node.status = status;
                marked += 1;
            }
        }
        marked
    }

    /// Set every node still marked running to `status`.
    pub fn mark_running(&mut self, status: StepStatus) -> usize {
        let mut marked = 0;
        for node in &mut self.nodes {
            if node.status == StepStatus::Running {
                node.status = status;
                marked += 1;
            }
        }
        marked
    }

    /// Nested `{name, description, log, status, children}` view of the tree,
    /// uploaded as the run's `step-data.json`.
    pub fn snapshot(&self) -> Value {
        self.snapshot_node(self.root())
    }

    fn snapshot_node(&self, id: StepId) -> Value {
        let node = &self.nodes[id.0];
        let children: Vec<Value> = node
            .children
            .iter()
            .map(|child| self.snapshot_node(*child))
            .collect();
        json!({
            "name": node.kind.id(),
            "description": super::describe(node.kind, &node.config),
            "log": "",
            "status": node.status.as_str(),
            "children": children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::transport::ClientType;

    fn login_steps() -> Value {
        json!([
            {"goto": "https://example.com/login"},
            {"find": [
                {"id": "username"},
                {"actions": [{"type": "alice"}, "click"]}
            ]},
            {"check": {"url": "https://example.com/home"}}
        ])
    }

    #[test]
    fn test_build_preorder() {
        let tree = StepTree::build(&login_steps());
        let kinds: Vec<StepKind> = tree.ids().map(|id| tree.kind(id)).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::Root,
                StepKind::Goto,
                StepKind::Find,
                StepKind::Actions,
                StepKind::Type,
                StepKind::Click,
                StepKind::Check,
                StepKind::CheckUrl,
            ]
        );
    }

    #[test]
    fn test_breadcrumb() {
        let tree = StepTree::build(&login_steps());
        let type_step = tree.ids().find(|id| tree.kind(*id) == StepKind::Type).unwrap();
        assert_eq!(tree.breadcrumb(type_step), "Root -> Find -> Actions -> Type");
        assert_eq!(tree.breadcrumb(tree.root()), "Root");
    }

    #[test]
    fn test_unknown_keys_skipped() {
        let tree = StepTree::build(&json!([{"teleport": "mars"}, {"goto": "https://x"}]));
        assert_eq!(tree.len(), 2);
        assert!(tree.validate(&PluginRegistry::default()).is_ok());
    }

    #[test]
    fn test_unknown_nested_keys_skipped() {
        let tree = StepTree::build(&json!([
            {"goto": "https://x"},
            {"check": {"response": 200, "latency_budget": 300}}
        ]));
        let kinds: Vec<_> = tree.ids().map(|id| tree.kind(id)).collect();
        assert_eq!(
            kinds,
            vec![StepKind::Root, StepKind::Goto, StepKind::Check, StepKind::CheckResponse]
        );
        assert!(tree.validate(&PluginRegistry::default()).is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let tree = StepTree::build(&json!([
            {"goto": ""},
            {"find": [{"id": "x"}, {"actions": [{"press": "escape"}]}]},
            {"check": {"response": "not-a-code"}}
        ]));
        let errors = tree.validate(&PluginRegistry::default()).unwrap_err();
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"Root -> GoTo"));
        assert!(paths.contains(&"Root -> Find -> Actions -> Press"));
        assert!(paths.contains(&"Root -> Check -> CheckResponse"));
    }

    #[test]
    fn test_supported_transports_intersection() {
        let browser_only = StepTree::build(&login_steps());
        let set = browser_only.supported_transports();
        assert!(!set.contains(ClientType::Requests));
        assert!(set.contains(ClientType::Firefox));
        assert!(set.contains(ClientType::Chrome));

        let requests_only = StepTree::build(&json!([
            {"goto": {"url": "https://x", "method": "post"}},
            {"check": {"response": 200}}
        ]));
        assert_eq!(requests_only.supported_transports(), TransportSet::REQUESTS);

        let none = StepTree::build(&json!([
            {"dns": "example.com"},
            {"find": [{"id": "x"}]}
        ]));
        assert!(none.supported_transports().is_empty());
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut tree = StepTree::build(&json!([]));
        let root = tree.root();
        assert!(tree.set_status(root, StepStatus::Running));
        assert!(tree.set_status(root, StepStatus::Failed));
        assert!(!tree.set_status(root, StepStatus::Success));
        assert_eq!(tree.status(root), StepStatus::Failed);
    }

    #[test]
    fn test_mark_unvisited() {
        let mut tree = StepTree::build(&login_steps());
        let root = tree.root();
        tree.set_status(root, StepStatus::Running);
        let marked = tree.mark_unvisited(StepStatus::Timeout);
        assert_eq!(marked, tree.len() - 1);
        assert_eq!(tree.status(root), StepStatus::Running);
    }

    #[test]
    fn test_mark_running() {
        let mut tree = StepTree::build(&login_steps());
        let root = tree.root();
        let first = tree.children(root)[0];
        tree.set_status(root, StepStatus::Running);
        tree.set_status(first, StepStatus::Success);
        let marked = tree.mark_running(StepStatus::InternalError);
        assert_eq!(marked, 1);
        assert_eq!(tree.status(root), StepStatus::InternalError);
        assert_eq!(tree.status(first), StepStatus::Success);
    }

    #[test]
    fn test_snapshot_shape() {
        let tree = StepTree::build(&json!([{"goto": "https://example.com"}]));
        let snapshot = tree.snapshot();
        assert_eq!(snapshot["name"], "Root");
        assert_eq!(snapshot["status"], "NOT_RUN");
        assert_eq!(snapshot["children"][0]["name"], "GoTo");
        assert_eq!(snapshot["children"][0]["log"], "");
        assert!(snapshot["children"][0]["children"].as_array().unwrap().is_empty());
    }
}
