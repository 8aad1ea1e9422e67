// SPDX-License-Identifier: MIT

//! Workflow status derivation

use crate::dagflow::repository::WorkflowStatus;
use crate::graph::{GraphState, NodeState};

/// Derive a workflow status from node states and the pending rule count.
///
/// Priority: FAILED, then RUNNING (SUBMITTED counts as running), then WAITING
/// for any unfinished node or pending rule, otherwise SUCCESS.
pub fn derive_status<I>(states: I, pending_rules: usize) -> WorkflowStatus
where
    I: IntoIterator<Item = NodeState>,
{
    let mut running = false;
    let mut unfinished = false;

    for state in states {
        match state {
            NodeState::Failed => return WorkflowStatus::Failed,
            NodeState::Running | NodeState::Submitted => running = true,
            NodeState::Defined => unfinished = true,
            NodeState::Success => {}
        }
    }

    if running {
        WorkflowStatus::Running
    } else if unfinished || pending_rules > 0 {
        WorkflowStatus::Waiting
    } else {
        WorkflowStatus::Success
    }
}

pub fn status_of(graph: &dyn GraphState) -> WorkflowStatus {
    let states = graph
        .nodes()
        .into_iter()
        .filter_map(|id| graph.node(&id))
        .map(|node| node.state);
    derive_status(states, graph.rules().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeState::*;
    use crate::graph::{GraphEngine, RootContext, StageGraphEngine};
    use serde_json::{json, Map};

    #[test]
    fn test_failed_wins_over_running() {
        assert_eq!(derive_status([Running, Failed], 0), WorkflowStatus::Failed);
        assert_eq!(derive_status([Failed, Submitted, Defined], 2), WorkflowStatus::Failed);
    }

    #[test]
    fn test_running_includes_submitted() {
        assert_eq!(derive_status([Submitted, Success], 0), WorkflowStatus::Running);
        assert_eq!(derive_status([Running, Defined], 1), WorkflowStatus::Running);
    }

    #[test]
    fn test_waiting_on_nodes_or_rules() {
        assert_eq!(derive_status([Success, Defined], 0), WorkflowStatus::Waiting);
        assert_eq!(derive_status([Success], 1), WorkflowStatus::Waiting);
        assert_eq!(derive_status([], 1), WorkflowStatus::Waiting);
    }

    #[test]
    fn test_success() {
        assert_eq!(derive_status([Success, Success], 0), WorkflowStatus::Success);
    }

    #[test]
    fn test_empty_graph_without_rules_is_success() {
        assert_eq!(derive_status([], 0), WorkflowStatus::Success);
    }

    #[test]
    fn test_status_of_graph() {
        let template = json!({
            "name": "t",
            "stages": [{"name": "build", "steps": [{"name": "compile"}]}]
        });
        let mut graph = StageGraphEngine
            .create(&template, RootContext::new("/tmp/t"))
            .unwrap();
        graph.init(&Map::new()).unwrap();
        assert_eq!(status_of(graph.as_ref()), WorkflowStatus::Waiting);

        graph.apply_rule("build").unwrap();
        assert_eq!(graph.nodes(), vec!["build.compile"]);
        assert_eq!(status_of(graph.as_ref()), WorkflowStatus::Waiting);

        let empty = StageGraphEngine
            .create(&json!({"name": "empty"}), RootContext::new("/tmp/e"))
            .unwrap();
        assert_eq!(status_of(empty.as_ref()), WorkflowStatus::Success);
    }
}
