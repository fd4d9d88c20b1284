//! Slot pool manager: a fixed set of reusable git worktrees.
//!
//! Every mutation is a read-modify-write of the whole pool document. Workspace
//! preconditions (clean worktree) are checked before anything is changed, so a
//! failed call leaves both the worktrees and the persisted state untouched.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::core::pool::{PoolState, SlotAssignment, SlotChoice, choose_slot};
use crate::core::topology::BranchTopology;
use crate::error::OrchardError;
use crate::io::git::WorkspaceProvider;
use crate::io::pool_store::PoolStore;

#[derive(Debug, Clone, Copy)]
pub struct AcquireRequest<'r> {
    pub branch: &'r str,
    /// Start point when the branch has to be created.
    pub parent: &'r str,
    /// Evict the oldest assignment when the pool is full.
    pub force: bool,
    /// Objective the work belongs to, recorded on the slot.
    pub objective: Option<&'r str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireAction {
    /// The branch already held a slot.
    Reused,
    /// An inactive slot was taken.
    Created,
    /// The oldest assignments were evicted to make room, oldest first.
    Evicted { previous_branches: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireOutcome {
    pub assignment: SlotAssignment,
    pub action: AcquireAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOutcome {
    pub assignment: SlotAssignment,
    pub parent: String,
    pub previous_branch: String,
}

pub struct SlotPool<'a, S: PoolStore, W: WorkspaceProvider> {
    store: &'a S,
    workspaces: &'a W,
    pool_size: usize,
    slots_dir: PathBuf,
}

impl<'a, S: PoolStore, W: WorkspaceProvider> SlotPool<'a, S, W> {
    /// `pool_size` comes from configuration and always wins over the persisted value.
    pub fn new(store: &'a S, workspaces: &'a W, pool_size: usize, slots_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            workspaces,
            pool_size,
            slots_dir: slots_dir.into(),
        }
    }

    fn load_state(&self) -> Result<PoolState> {
        let state = self
            .store
            .load()
            .context("load pool state")?
            .unwrap_or_else(|| PoolState::empty(self.pool_size));
        Ok(state.with_pool_size(self.pool_size))
    }

    /// Current pool document, sized by configuration.
    pub fn list(&self) -> Result<PoolState> {
        self.load_state()
    }

    pub fn find_assignment_for_branch(&self, branch: &str) -> Result<Option<SlotAssignment>> {
        Ok(self.load_state()?.find_assignment_for_branch(branch).cloned())
    }

    pub fn find_inactive_slot(&self) -> Result<Option<String>> {
        Ok(self.load_state()?.find_inactive_slot())
    }

    fn ensure_clean(&self, slot: &str, path: &Path) -> Result<()> {
        if self.workspaces.workspace_exists(path) && self.workspaces.has_uncommitted_changes(path)? {
            return Err(OrchardError::UncommittedChanges {
                slot: slot.to_string(),
                path: path.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }

    /// Put `branch` on `path`, creating the worktree or switching an existing one.
    fn materialize(&self, path: &Path, branch: &str, parent: &str) -> Result<()> {
        if !self.workspaces.workspace_exists(path) {
            debug!(path = %path.display(), "creating worktree");
            return self.workspaces.add_workspace(path, branch, parent);
        }
        let branches = self.workspaces.local_branches()?;
        if !branches.iter().any(|b| b == branch) {
            self.workspaces.create_branch(path, branch, parent)?;
        }
        self.workspaces.checkout_branch(path, branch)
    }

    /// Assign a slot to `request.branch`.
    ///
    /// Reuses the branch's existing slot, otherwise takes the lowest inactive
    /// slot, otherwise (with `force`) evicts the oldest assignments until the
    /// new one fits. Every victim must be clean before anything is evicted.
    #[instrument(skip_all, fields(branch = request.branch, force = request.force))]
    pub fn acquire(&self, request: AcquireRequest<'_>) -> Result<AcquireOutcome> {
        let mut state = self.load_state()?;
        let (slot_name, action) = match choose_slot(&state, request.branch, request.force)? {
            SlotChoice::Existing(assignment) => {
                debug!(slot = %assignment.slot_name, "branch already assigned");
                return Ok(AcquireOutcome {
                    assignment,
                    action: AcquireAction::Reused,
                });
            }
            SlotChoice::Free(name) => (name, AcquireAction::Created),
            SlotChoice::Evict { slot, victims } => {
                for victim in &victims {
                    self.ensure_clean(&victim.slot_name, &victim.worktree_path)?;
                }
                let mut previous_branches = Vec::with_capacity(victims.len());
                for victim in victims {
                    info!(slot = %victim.slot_name, evicted = %victim.branch_name, "evicting assignment");
                    state.unassign(&victim.slot_name);
                    previous_branches.push(victim.branch_name);
                }
                (slot, AcquireAction::Evicted { previous_branches })
            }
        };

        let path = state.ensure_slot(&slot_name, &self.slots_dir.join(&slot_name));
        self.ensure_clean(&slot_name, &path)?;
        self.materialize(&path, request.branch, request.parent)
            .with_context(|| format!("prepare {slot_name} for {}", request.branch))?;

        let assignment = SlotAssignment {
            slot_name,
            branch_name: request.branch.to_string(),
            assigned_at: Utc::now(),
            worktree_path: path,
        };
        state.assign(assignment.clone());
        if let Some(objective) = request.objective {
            state.note_objective(&assignment.slot_name, objective);
        }
        self.store.save(&mut state).context("save pool state")?;
        info!(slot = %assignment.slot_name, "slot assigned");
        Ok(AcquireOutcome { assignment, action })
    }

    /// Drop the assignment for `slot`. The worktree stays on disk for reuse.
    #[instrument(skip_all, fields(slot))]
    pub fn release(&self, slot: &str) -> Result<SlotAssignment> {
        let mut state = self.load_state()?;
        let Some(removed) = state.unassign(slot) else {
            if state.find_slot(slot).is_some() {
                return Err(OrchardError::SlotNotAssigned(slot.to_string()).into());
            }
            return Err(OrchardError::SlotNotFound(slot.to_string()).into());
        };
        self.store.save(&mut state).context("save pool state")?;
        info!(branch = %removed.branch_name, "slot released");
        Ok(removed)
    }

    /// Start `new_branch` in the same slot, stacked per `topology` on the
    /// slot's current branch. The assignment keeps its slot and takes the new branch.
    #[instrument(skip_all, fields(slot, new_branch))]
    pub fn stack_in_slot(
        &self,
        slot: &str,
        new_branch: &str,
        topology: &BranchTopology,
    ) -> Result<StackOutcome> {
        let mut state = self.load_state()?;
        let current = match state.find_assignment_for_slot(slot) {
            Some(assignment) => assignment.clone(),
            None if state.find_slot(slot).is_some() => {
                return Err(OrchardError::SlotNotAssigned(slot.to_string()).into());
            }
            None => return Err(OrchardError::SlotNotFound(slot.to_string()).into()),
        };
        if let Some(other) = state.find_assignment_for_branch(new_branch) {
            return Err(OrchardError::invalid(
                "branch",
                format!("'{new_branch}' is already assigned to {}", other.slot_name),
            )
            .into());
        }
        if self.workspaces.local_branches()?.iter().any(|b| b == new_branch) {
            return Err(OrchardError::invalid(
                "branch",
                format!("'{new_branch}' already exists; stacking starts a new branch"),
            )
            .into());
        }

        self.ensure_clean(slot, &current.worktree_path)?;
        let parent = topology.resolve_parent(&current.branch_name);
        self.materialize(&current.worktree_path, new_branch, &parent)
            .with_context(|| format!("stack {new_branch} in {slot}"))?;

        let assignment = SlotAssignment {
            branch_name: new_branch.to_string(),
            assigned_at: Utc::now(),
            ..current.clone()
        };
        state.assign(assignment.clone());
        self.store.save(&mut state).context("save pool state")?;
        info!(parent = %parent, "branch stacked in slot");
        Ok(StackOutcome {
            assignment,
            parent,
            previous_branch: current.branch_name,
        })
    }
}
