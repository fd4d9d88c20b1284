//! Deterministic selection of dispatchable roadmap steps.

use crate::core::roadmap::{RoadmapGraph, RoadmapNode};

/// A dispatchable node paired with its phase display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnblockedNode {
    pub node: RoadmapNode,
    pub phase: String,
}

/// Pending nodes whose dependencies are all done, in document order.
pub fn unblocked_nodes(graph: &RoadmapGraph<'_>) -> Vec<UnblockedNode> {
    let roadmap = graph.roadmap();
    roadmap
        .nodes
        .iter()
        .filter(|node| graph.is_unblocked(node))
        .map(|node| UnblockedNode {
            node: node.clone(),
            phase: roadmap.phase_name(node),
        })
        .collect()
}

/// First unblocked node in document order.
pub fn first_unblocked<'a>(graph: &RoadmapGraph<'a>) -> Option<&'a RoadmapNode> {
    graph
        .roadmap()
        .nodes
        .iter()
        .find(|node| graph.is_unblocked(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::roadmap::NodeStatus;
    use crate::test_support::{roadmap, step};

    #[test]
    fn siblings_unblock_once_dependency_is_done() {
        let map = roadmap(vec![
            step("1.1", NodeStatus::Done, &[]),
            step("2.1", NodeStatus::Pending, &["1.1"]),
            step("2.2", NodeStatus::Pending, &["1.1"]),
            step("3.1", NodeStatus::Pending, &["2.1", "2.2"]),
        ]);
        let graph = map.graph().expect("graph");
        let ids: Vec<String> = unblocked_nodes(&graph)
            .into_iter()
            .map(|u| u.node.id)
            .collect();
        assert_eq!(ids, vec!["2.1", "2.2"]);
        assert_eq!(first_unblocked(&graph).map(|n| n.id.as_str()), Some("2.1"));
    }

    #[test]
    fn planning_and_in_progress_nodes_are_not_dispatchable() {
        let map = roadmap(vec![
            step("1.1", NodeStatus::Planning, &[]),
            step("1.2", NodeStatus::InProgress, &[]),
            step("1.3", NodeStatus::Pending, &["1.2"]),
        ]);
        let graph = map.graph().expect("graph");
        assert!(unblocked_nodes(&graph).is_empty());
        assert_eq!(first_unblocked(&graph), None);
    }

    #[test]
    fn phase_names_travel_with_nodes() {
        let map = roadmap(vec![step("4.2", NodeStatus::Pending, &[])]);
        let graph = map.graph().expect("graph");
        assert_eq!(unblocked_nodes(&graph)[0].phase, "Phase 4");
    }
}
