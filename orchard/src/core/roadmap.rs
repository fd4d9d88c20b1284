//! Objective roadmap document and its dependency graph.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::invariants::validate_roadmap_invariants;
use crate::error::OrchardError;

pub const ROADMAP_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Planning,
    InProgress,
    Done,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadmapNode {
    pub id: String,
    pub description: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl RoadmapNode {
    /// Phase id: the id prefix before the first `.`.
    pub fn phase_id(&self) -> &str {
        self.id.split('.').next().unwrap_or(&self.id)
    }

    pub fn links_to(&self, reference: &str) -> bool {
        self.plan.as_deref() == Some(reference) || self.pr.as_deref() == Some(reference)
    }
}

/// Versioned roadmap block embedded in an objective body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roadmap {
    pub schema_version: String,
    #[serde(default)]
    pub phases: Vec<Phase>,
    pub nodes: Vec<RoadmapNode>,
}

/// Status change for one node, applied as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeUpdate {
    pub node_id: String,
    pub status: NodeStatus,
    pub plan: Option<String>,
    pub pr: Option<String>,
}

impl Roadmap {
    pub fn node(&self, id: &str) -> Option<&RoadmapNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Display name for a node's phase.
    pub fn phase_name(&self, node: &RoadmapNode) -> String {
        let phase_id = node.phase_id();
        self.phases
            .iter()
            .find(|p| p.id == phase_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("Phase {phase_id}"))
    }

    /// Validate invariants and build the adjacency index.
    pub fn graph(&self) -> Result<RoadmapGraph<'_>, OrchardError> {
        let errors = validate_roadmap_invariants(self);
        if !errors.is_empty() {
            return Err(OrchardError::InvalidRoadmap(errors));
        }
        Ok(RoadmapGraph::build(self))
    }

    /// Apply all updates or none. Unknown ids fail before anything changes.
    pub fn apply_updates(&mut self, objective: &str, updates: &[NodeUpdate]) -> Result<(), OrchardError> {
        if let Some(missing) = updates.iter().find(|u| self.node(&u.node_id).is_none()) {
            return Err(OrchardError::NodeNotFound {
                objective: objective.to_string(),
                node: missing.node_id.clone(),
            });
        }
        for update in updates {
            if let Some(node) = self.nodes.iter_mut().find(|n| n.id == update.node_id) {
                node.status = update.status;
                if update.plan.is_some() {
                    node.plan.clone_from(&update.plan);
                }
                if update.pr.is_some() {
                    node.pr.clone_from(&update.pr);
                }
            }
        }
        Ok(())
    }
}

/// Adjacency built once per read: id -> position, id -> dependents.
#[derive(Debug)]
pub struct RoadmapGraph<'a> {
    roadmap: &'a Roadmap,
    index: HashMap<&'a str, usize>,
    dependents: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> RoadmapGraph<'a> {
    fn build(roadmap: &'a Roadmap) -> Self {
        let mut index = HashMap::with_capacity(roadmap.nodes.len());
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (pos, node) in roadmap.nodes.iter().enumerate() {
            index.insert(node.id.as_str(), pos);
            for dep in &node.depends_on {
                dependents.entry(dep.as_str()).or_default().push(node.id.as_str());
            }
        }
        Self {
            roadmap,
            index,
            dependents,
        }
    }

    pub fn roadmap(&self) -> &'a Roadmap {
        self.roadmap
    }

    pub fn node(&self, id: &str) -> Option<&'a RoadmapNode> {
        self.index.get(id).map(|pos| &self.roadmap.nodes[*pos])
    }

    /// Nodes that list `id` in `depends_on`, in document order.
    pub fn dependents_of(&self, id: &str) -> &[&'a str] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True iff the node is pending and every dependency is done.
    pub fn is_unblocked(&self, node: &RoadmapNode) -> bool {
        node.status == NodeStatus::Pending
            && node.depends_on.iter().all(|dep| {
                self.node(dep)
                    .is_some_and(|d| d.status == NodeStatus::Done)
            })
    }
}
