//! Orchestration for starting, submitting, and landing plan work.
//!
//! These functions tie the topology resolver, the slot pool, the plan store,
//! and the roadmap together. Preconditions are checked before the first
//! side effect.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::plan::{KEY_BRANCH_NAME, KEY_WORKTREE_NAME, Plan, parse_record_number, plan_branch_name};
use crate::core::topology::BranchTopology;
use crate::core::types::{LifecycleStage, RecordState};
use crate::error::OrchardError;
use crate::io::git::WorkspaceProvider;
use crate::io::graphite::StackProvider;
use crate::io::pool_store::PoolStore;
use crate::io::roadmap_store::RoadmapStore;
use crate::objective::{mark_submitted, record_landed};
use crate::plans::PlanStore;
use crate::slots::{AcquireOutcome, AcquireRequest, SlotPool, StackOutcome};

/// Outcome of `orchard plan start`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOutcome {
    pub plan: Plan,
    pub branch: String,
    pub parent: String,
    pub slot: AcquireOutcome,
}

/// Start (or resume) implementation of a plan in a slot.
///
/// - Branch: the plan's `branch_name` hint, else `P<id>-<slug>`.
/// - Parent: resolved from `current_branch`; a non-trunk parent must be tracked.
/// - Slot: acquired from the pool (reused if the branch already holds one).
/// - Plan: header records slot and branch, stage moves to `implementing`.
#[instrument(skip_all, fields(plan_id = %plan_id, force))]
pub fn start_plan<P, S, W, K>(
    plans: &P,
    pool: &SlotPool<'_, S, W>,
    stack: &K,
    topology: &BranchTopology,
    current_branch: &str,
    plan_id: &str,
    force: bool,
) -> Result<StartOutcome>
where
    P: PlanStore + ?Sized,
    S: PoolStore,
    W: WorkspaceProvider,
    K: StackProvider,
{
    let plan = plans.get(plan_id)?;
    let stage = plan.lifecycle_stage();
    if stage.is_terminal() || stage > LifecycleStage::Implementing {
        return Err(OrchardError::InvalidTransition {
            plan: plan.identifier.clone(),
            from: stage.to_string(),
            to: LifecycleStage::Implementing.to_string(),
        }
        .into());
    }

    let branch = plan
        .metadata_str(KEY_BRANCH_NAME)
        .map(str::to_string)
        .unwrap_or_else(|| plan_branch_name(&plan.identifier, &plan.title));
    let parent = topology.resolve_parent(current_branch);
    topology.ensure_parent_tracked(&parent, |b| stack.is_branch_tracked(b))?;

    let slot = pool.acquire(AcquireRequest {
        branch: &branch,
        parent: &parent,
        force,
        objective: plan.objective_link().map(|(objective, _)| objective),
    })?;
    if topology.stacked && !stack.is_branch_tracked(&branch)? {
        debug!(branch = %branch, parent = %parent, "tracking new branch");
        stack.track_branch(&branch, &parent)?;
    }

    let entries = BTreeMap::from([
        (KEY_WORKTREE_NAME.to_string(), Value::from(slot.assignment.slot_name.as_str())),
        (KEY_BRANCH_NAME.to_string(), Value::from(branch.as_str())),
    ]);
    let mut plan = plans.update_metadata(&plan.identifier, &entries)?;
    if stage < LifecycleStage::Implementing {
        let data = BTreeMap::from([
            ("slot".to_string(), Value::from(slot.assignment.slot_name.as_str())),
            ("branch".to_string(), Value::from(branch.as_str())),
        ]);
        plan = plans.advance(&plan.identifier, LifecycleStage::Implementing, data)?;
    }
    info!(plan = %plan.identifier, slot = %slot.assignment.slot_name, "plan started");
    Ok(StartOutcome {
        plan,
        branch,
        parent,
        slot,
    })
}

/// Start `new_branch` in `slot` on top of the slot's current branch.
///
/// With stacking enabled the slot's branch must be tracked before anything
/// changes, and the new branch is tracked afterwards.
pub fn stack_branch<S, W, K>(
    pool: &SlotPool<'_, S, W>,
    stack: &K,
    topology: &BranchTopology,
    slot: &str,
    new_branch: &str,
) -> Result<StackOutcome>
where
    S: PoolStore,
    W: WorkspaceProvider,
    K: StackProvider,
{
    if topology.stacked {
        let state = pool.list()?;
        if let Some(current) = state.find_assignment_for_slot(slot) {
            let parent = topology.resolve_parent(&current.branch_name);
            topology.ensure_parent_tracked(&parent, |b| stack.is_branch_tracked(b))?;
        }
    }
    let outcome = pool.stack_in_slot(slot, new_branch, topology)?;
    if topology.stacked {
        stack.track_branch(new_branch, &outcome.parent)?;
    }
    Ok(outcome)
}

#[derive(Debug, Clone, Copy)]
pub struct SubmitRequest<'r> {
    /// Pull request number or URL.
    pub pr: &'r str,
    /// Branch the pull request targets.
    pub parent: &'r str,
    pub submitted_by: Option<&'r str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub plan: Plan,
    /// Line to append to the pull request body, if the backend needs one.
    pub footer: Option<String>,
    pub node_marked: Option<String>,
}

/// Record that a plan's pull request is up.
#[instrument(skip_all, fields(plan_id))]
pub fn submit_plan<P, M, K>(
    plans: &P,
    roadmaps: &M,
    stack: &K,
    topology: &BranchTopology,
    plan_id: &str,
    request: SubmitRequest<'_>,
) -> Result<SubmitOutcome>
where
    P: PlanStore + ?Sized,
    M: RoadmapStore,
    K: StackProvider,
{
    topology.ensure_parent_tracked(request.parent, |b| stack.is_branch_tracked(b))?;
    let pr = format!("#{}", parse_record_number(request.pr)?);

    let mut data = BTreeMap::from([("pr".to_string(), Value::from(pr.as_str()))]);
    if let Some(by) = request.submitted_by {
        data.insert("submitted_by".to_string(), Value::from(by));
    }
    let plan = plans.advance(plan_id, LifecycleStage::Submitted, data)?;

    let node_marked = match plan.objective_link() {
        Some((objective, node)) => {
            mark_submitted(roadmaps, objective, node, &pr)
                .with_context(|| format!("update step {node} of objective #{objective}"))?;
            Some(node.to_string())
        }
        None => None,
    };
    let footer = plans.closing_reference(&plan.identifier);
    Ok(SubmitOutcome {
        plan,
        footer,
        node_marked,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandOutcome {
    pub plan: Plan,
    pub record_closed: bool,
    pub nodes_done: Vec<String>,
}

/// Record that a plan's change merged.
#[instrument(skip_all, fields(plan_id))]
pub fn land_plan<P, M>(plans: &P, roadmaps: &M, plan_id: &str, pr: Option<&str>) -> Result<LandOutcome>
where
    P: PlanStore + ?Sized,
    M: RoadmapStore,
{
    let pr = pr
        .map(|raw| parse_record_number(raw).map(|n| format!("#{n}")))
        .transpose()?;
    let mut data = BTreeMap::new();
    if let Some(pr) = &pr {
        data.insert("pr".to_string(), Value::from(pr.as_str()));
    }
    let mut plan = plans.advance(plan_id, LifecycleStage::Landed, data)?;

    let record_closed = plans.closes_on_land() && plan.state == RecordState::Open;
    if record_closed {
        let number = parse_record_number(&plan.identifier)?;
        plans.records().set_state(number, RecordState::Closed)?;
        plan.state = RecordState::Closed;
    }

    let nodes_done = match plan.objective_link() {
        Some((objective, _)) => {
            let mut references = vec![format!("#{}", plan.identifier)];
            references.extend(pr);
            record_landed(roadmaps, objective, &references)
                .with_context(|| format!("update roadmap of objective #{objective}"))?
        }
        None => Vec::new(),
    };
    info!(plan = %plan.identifier, nodes = nodes_done.len(), "plan landed");
    Ok(LandOutcome {
        plan,
        record_closed,
        nodes_done,
    })
}
