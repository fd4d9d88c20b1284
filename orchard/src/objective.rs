//! Objective roadmap scheduler.
//!
//! Dispatching a step creates a plan for it, triggers the remote runner, and
//! marks the step `planning`. Fan-out dispatch triggers every unblocked step
//! in document order and then commits all successful steps in a single roadmap
//! write.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::plan::{KEY_NODE_ID, KEY_OBJECTIVE_ID};
use crate::core::roadmap::{NodeStatus, NodeUpdate, RoadmapNode};
use crate::core::selector::{UnblockedNode, first_unblocked, unblocked_nodes};
use crate::core::types::{EventKind, LifecycleStage, PlanEvent};
use crate::error::OrchardError;
use crate::io::dispatch::{Dispatcher, RunReference};
use crate::io::instruction::{InstructionInputs, normalize_model, render_instruction};
use crate::io::roadmap_store::{RoadmapSnapshot, RoadmapStore};
use crate::plans::{CreatePlan, PlanStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    pub dry_run: bool,
    /// Model passed to the runner; aliases are accepted.
    pub model: String,
    /// Extra labels for created plans.
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedNode {
    pub node_id: String,
    pub phase: String,
    /// `None` on dry runs.
    pub plan_id: Option<String>,
    pub run: Option<RunReference>,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub node_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub objective: String,
    pub dispatched: Vec<DispatchedNode>,
    pub failures: Vec<DispatchFailure>,
    pub dry_run: bool,
    pub roadmap_written: bool,
}

impl DispatchReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct ObjectiveScheduler<'a, M: RoadmapStore, P: PlanStore + ?Sized, D: Dispatcher> {
    roadmaps: &'a M,
    plans: &'a P,
    dispatcher: &'a D,
}

impl<'a, M: RoadmapStore, P: PlanStore + ?Sized, D: Dispatcher> ObjectiveScheduler<'a, M, P, D> {
    pub fn new(roadmaps: &'a M, plans: &'a P, dispatcher: &'a D) -> Self {
        Self {
            roadmaps,
            plans,
            dispatcher,
        }
    }

    /// Pending steps whose dependencies are done, in document order.
    ///
    /// Fails with [`OrchardError::NoUnblockedNodes`] when there are none.
    pub fn resolve_unblocked(&self, objective: &str) -> Result<Vec<UnblockedNode>> {
        let snapshot = self.roadmaps.load(objective)?;
        let graph = snapshot.roadmap.graph()?;
        let unblocked = unblocked_nodes(&graph);
        if unblocked.is_empty() {
            return Err(OrchardError::NoUnblockedNodes(snapshot.objective.clone()).into());
        }
        Ok(unblocked)
    }

    /// Dispatch `node`, or the first unblocked step when `node` is `None`.
    #[instrument(skip_all, fields(objective, node = ?node, dry_run = options.dry_run))]
    pub fn dispatch_one(
        &self,
        objective: &str,
        node: Option<&str>,
        options: &DispatchOptions,
    ) -> Result<DispatchReport> {
        let model = normalize_model(&options.model)?;
        let snapshot = self.roadmaps.load(objective)?;
        let graph = snapshot.roadmap.graph()?;

        let target = match node {
            Some(id) => {
                let found = graph.node(id).ok_or_else(|| OrchardError::NodeNotFound {
                    objective: snapshot.objective.clone(),
                    node: id.to_string(),
                })?;
                if found.status != NodeStatus::Pending {
                    return Err(OrchardError::invalid(
                        "node",
                        format!("step {id} is {}, not pending", found.status),
                    )
                    .into());
                }
                if !graph.is_unblocked(found) {
                    warn!(node = id, "dispatching a step with unfinished dependencies");
                }
                found
            }
            None => first_unblocked(&graph)
                .ok_or_else(|| OrchardError::NoUnblockedNodes(snapshot.objective.clone()))?,
        };
        let phase = snapshot.roadmap.phase_name(target);
        let dispatched = self.dispatch_node(&snapshot, target, &phase, model, options)?;

        let mut report = DispatchReport {
            objective: snapshot.objective.clone(),
            dispatched: vec![dispatched],
            failures: Vec::new(),
            dry_run: options.dry_run,
            roadmap_written: false,
        };
        if !options.dry_run {
            self.commit_planning(&snapshot, &report.dispatched)?;
            report.roadmap_written = true;
        }
        Ok(report)
    }

    /// Dispatch every unblocked step, then record all successes in one write.
    #[instrument(skip_all, fields(objective, dry_run = options.dry_run))]
    pub fn dispatch_all_unblocked(
        &self,
        objective: &str,
        options: &DispatchOptions,
    ) -> Result<DispatchReport> {
        let model = normalize_model(&options.model)?;
        let snapshot = self.roadmaps.load(objective)?;
        let graph = snapshot.roadmap.graph()?;
        let unblocked = unblocked_nodes(&graph);
        if unblocked.is_empty() {
            return Err(OrchardError::NoUnblockedNodes(snapshot.objective.clone()).into());
        }

        let mut report = DispatchReport {
            objective: snapshot.objective.clone(),
            dispatched: Vec::new(),
            failures: Vec::new(),
            dry_run: options.dry_run,
            roadmap_written: false,
        };
        for UnblockedNode { node, phase } in &unblocked {
            match self.dispatch_node(&snapshot, node, phase, model, options) {
                Ok(dispatched) => report.dispatched.push(dispatched),
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(node = %node.id, err = %error, "step dispatch failed");
                    report.failures.push(DispatchFailure {
                        node_id: node.id.clone(),
                        error,
                    });
                }
            }
        }

        if !options.dry_run && !report.dispatched.is_empty() {
            self.commit_planning(&snapshot, &report.dispatched)
                .with_context(|| {
                    format!(
                        "{} step(s) were dispatched but the roadmap was not updated",
                        report.dispatched.len()
                    )
                })?;
            report.roadmap_written = true;
        }
        info!(
            dispatched = report.dispatched.len(),
            failed = report.failures.len(),
            "fan-out finished"
        );
        Ok(report)
    }

    fn dispatch_node(
        &self,
        snapshot: &RoadmapSnapshot,
        node: &RoadmapNode,
        phase: &str,
        model: &str,
        options: &DispatchOptions,
    ) -> Result<DispatchedNode> {
        if options.dry_run {
            let instruction = render_instruction(&InstructionInputs {
                objective_id: &snapshot.objective,
                objective_title: &snapshot.title,
                node,
                phase,
                plan_id: None,
            })?;
            return Ok(DispatchedNode {
                node_id: node.id.clone(),
                phase: phase.to_string(),
                plan_id: None,
                run: None,
                instruction,
            });
        }

        let plan = self
            .plans
            .create(&CreatePlan {
                content: plan_content(&snapshot.objective, node, phase),
                title: None,
                labels: options.labels.clone(),
                metadata: BTreeMap::from([
                    (KEY_OBJECTIVE_ID.to_string(), Value::from(snapshot.objective.as_str())),
                    (KEY_NODE_ID.to_string(), Value::from(node.id.as_str())),
                ]),
            })
            .with_context(|| format!("create plan for step {}", node.id))?;
        self.plans
            .advance(&plan.identifier, LifecycleStage::Queued, BTreeMap::new())?;

        let instruction = render_instruction(&InstructionInputs {
            objective_id: &snapshot.objective,
            objective_title: &snapshot.title,
            node,
            phase,
            plan_id: Some(&plan.identifier),
        })?;
        let inputs = BTreeMap::from([
            ("objective".to_string(), snapshot.objective.clone()),
            ("node_id".to_string(), node.id.clone()),
            ("plan_id".to_string(), plan.identifier.clone()),
            ("model".to_string(), model.to_string()),
        ]);
        let run = self
            .dispatcher
            .trigger(&instruction, &inputs)
            .with_context(|| format!("trigger step {}", node.id))?;

        let mut event = PlanEvent::new(EventKind::WorkflowStarted, Utc::now())
            .with("workflow", run.workflow.as_str())
            .with("model", model);
        if let Some(url) = &run.url {
            event = event.with("run_url", url.as_str());
        }
        self.plans.append_event(&plan.identifier, &event)?;
        info!(node = %node.id, plan = %plan.identifier, "step dispatched");

        Ok(DispatchedNode {
            node_id: node.id.clone(),
            phase: phase.to_string(),
            plan_id: Some(plan.identifier),
            run: Some(run),
            instruction,
        })
    }

    fn commit_planning(&self, snapshot: &RoadmapSnapshot, dispatched: &[DispatchedNode]) -> Result<()> {
        let updates: Vec<NodeUpdate> = dispatched
            .iter()
            .map(|d| NodeUpdate {
                node_id: d.node_id.clone(),
                status: NodeStatus::Planning,
                plan: d.plan_id.as_ref().map(|id| format!("#{id}")),
                pr: None,
            })
            .collect();
        write_updates(self.roadmaps, snapshot, &updates)
    }
}

fn plan_content(objective: &str, node: &RoadmapNode, phase: &str) -> String {
    format!(
        "# {}\n\nStep {} ({phase}) of objective #{objective}.\n",
        node.description.trim(),
        node.id
    )
}

fn write_updates<M: RoadmapStore>(
    roadmaps: &M,
    snapshot: &RoadmapSnapshot,
    updates: &[NodeUpdate],
) -> Result<()> {
    let mut roadmap = snapshot.roadmap.clone();
    roadmap.apply_updates(&snapshot.objective, updates)?;
    roadmaps.save(snapshot, &roadmap)
}

/// Mark a step `in_progress` once its pull request is up.
pub fn mark_submitted<M: RoadmapStore>(roadmaps: &M, objective: &str, node: &str, pr: &str) -> Result<()> {
    let snapshot = roadmaps.load(objective)?;
    let update = NodeUpdate {
        node_id: node.to_string(),
        status: NodeStatus::InProgress,
        plan: None,
        pr: Some(pr.to_string()),
    };
    write_updates(roadmaps, &snapshot, &[update])
}

/// Mark every step linked to any of `references` as `done` in one write.
/// Returns the ids that changed.
pub fn record_landed<M: RoadmapStore>(
    roadmaps: &M,
    objective: &str,
    references: &[String],
) -> Result<Vec<String>> {
    let snapshot = roadmaps.load(objective)?;
    let updates: Vec<NodeUpdate> = snapshot
        .roadmap
        .nodes
        .iter()
        .filter(|n| n.status != NodeStatus::Done && references.iter().any(|r| n.links_to(r)))
        .map(|n| NodeUpdate {
            node_id: n.id.clone(),
            status: NodeStatus::Done,
            plan: None,
            pr: None,
        })
        .collect();
    if updates.is_empty() {
        return Ok(Vec::new());
    }
    write_updates(roadmaps, &snapshot, &updates)?;
    Ok(updates.into_iter().map(|u| u.node_id).collect())
}
