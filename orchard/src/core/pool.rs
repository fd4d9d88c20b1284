//! Slot pool state and the slot-choice policy.
//!
//! Everything here is pure: callers load a [`PoolState`], ask for a decision,
//! perform the workspace side effects, and persist the whole state back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrchardError;

pub const POOL_FORMAT_VERSION: &str = "1";

/// A reusable named workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub path: PathBuf,
    /// Objective the slot last worked on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_objective: Option<String>,
}

/// Current occupancy of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub slot_name: String,
    pub branch_name: String,
    pub assigned_at: DateTime<Utc>,
    pub worktree_path: PathBuf,
}

/// Persisted pool document (`pool.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub version: String,
    /// Incremented on every save; used to detect concurrent writers.
    #[serde(default)]
    pub revision: u64,
    pub pool_size: usize,
    #[serde(default)]
    pub slots: Vec<Slot>,
    #[serde(default)]
    pub assignments: Vec<SlotAssignment>,
}

/// What `acquire` should do for a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotChoice {
    /// The branch already holds a slot.
    Existing(SlotAssignment),
    /// An unassigned slot is available.
    Free(String),
    /// The pool is full. `victims` (oldest first) are evicted and `slot` is taken.
    Evict {
        slot: String,
        victims: Vec<SlotAssignment>,
    },
}

/// Canonical, ordinal-suffixed slot name (1-indexed).
pub fn slot_name(index: usize) -> String {
    format!("orchard-slot-{index:02}")
}

impl PoolState {
    pub fn empty(pool_size: usize) -> Self {
        Self {
            version: POOL_FORMAT_VERSION.to_string(),
            revision: 0,
            pool_size,
            slots: Vec::new(),
            assignments: Vec::new(),
        }
    }

    /// Configuration is the source of truth for pool size.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn find_assignment_for_branch(&self, branch: &str) -> Option<&SlotAssignment> {
        self.assignments.iter().find(|a| a.branch_name == branch)
    }

    pub fn find_assignment_for_slot(&self, slot: &str) -> Option<&SlotAssignment> {
        self.assignments.iter().find(|a| a.slot_name == slot)
    }

    pub fn find_slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn is_full(&self) -> bool {
        self.assignments.len() >= self.pool_size
    }

    /// Lowest-numbered slot within the pool size that holds no assignment.
    pub fn find_inactive_slot(&self) -> Option<String> {
        if self.is_full() {
            return None;
        }
        (1..=self.pool_size)
            .map(slot_name)
            .find(|name| self.find_assignment_for_slot(name).is_none())
    }

    /// Assignments ordered by `assigned_at`, ties broken by slot name.
    pub fn assignments_by_age(&self) -> Vec<&SlotAssignment> {
        let mut by_age: Vec<&SlotAssignment> = self.assignments.iter().collect();
        by_age.sort_by(|a, b| {
            a.assigned_at
                .cmp(&b.assigned_at)
                .then_with(|| a.slot_name.cmp(&b.slot_name))
        });
        by_age
    }

    /// Record the objective a slot is working on.
    pub fn note_objective(&mut self, slot: &str, objective: &str) {
        if let Some(entry) = self.slots.iter_mut().find(|s| s.name == slot) {
            entry.last_objective = Some(objective.to_string());
        }
    }

    /// `(slot, branch)` pairs in slot order.
    pub fn occupants(&self) -> Vec<(String, String)> {
        let mut occupants: Vec<(String, String)> = self
            .assignments
            .iter()
            .map(|a| (a.slot_name.clone(), a.branch_name.clone()))
            .collect();
        occupants.sort();
        occupants
    }

    /// Path of a slot, registering it with `default_path` on first use.
    pub fn ensure_slot(&mut self, name: &str, default_path: &Path) -> PathBuf {
        if let Some(slot) = self.find_slot(name) {
            return slot.path.clone();
        }
        self.slots.push(Slot {
            name: name.to_string(),
            path: default_path.to_path_buf(),
            last_objective: None,
        });
        self.slots.sort_by(|a, b| a.name.cmp(&b.name));
        default_path.to_path_buf()
    }

    /// Insert or replace the assignment for `assignment.slot_name`.
    pub fn assign(&mut self, assignment: SlotAssignment) {
        self.assignments
            .retain(|existing| existing.slot_name != assignment.slot_name);
        self.assignments.push(assignment);
        self.assignments
            .sort_by(|a, b| a.slot_name.cmp(&b.slot_name));
    }

    pub fn unassign(&mut self, slot: &str) -> Option<SlotAssignment> {
        let index = self.assignments.iter().position(|a| a.slot_name == slot)?;
        Some(self.assignments.remove(index))
    }
}

/// Decide where `branch` should run.
///
/// Fails with [`OrchardError::PoolExhausted`] when the pool is full and
/// `force` is not set. With `force`, the oldest assignments are evicted until
/// the new one fits within `pool_size`, which also drains a pool that shrank
/// below its assignment count.
pub fn choose_slot(state: &PoolState, branch: &str, force: bool) -> Result<SlotChoice, OrchardError> {
    if let Some(existing) = state.find_assignment_for_branch(branch) {
        return Ok(SlotChoice::Existing(existing.clone()));
    }
    if let Some(free) = state.find_inactive_slot() {
        return Ok(SlotChoice::Free(free));
    }
    let exhausted = || OrchardError::PoolExhausted {
        pool_size: state.pool_size,
        occupants: state.occupants(),
    };
    if !force || state.pool_size == 0 {
        return Err(exhausted());
    }
    let excess = (state.assignments.len() + 1).saturating_sub(state.pool_size);
    let victims: Vec<SlotAssignment> = state
        .assignments_by_age()
        .into_iter()
        .take(excess)
        .cloned()
        .collect();
    let slot = (1..=state.pool_size)
        .map(slot_name)
        .find(|name| {
            !state
                .assignments
                .iter()
                .any(|a| &a.slot_name == name && !victims.contains(a))
        })
        .ok_or_else(exhausted)?;
    Ok(SlotChoice::Evict { slot, victims })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, secs).unwrap()
    }

    fn assignment(slot: usize, branch: &str, secs: u32) -> SlotAssignment {
        SlotAssignment {
            slot_name: slot_name(slot),
            branch_name: branch.to_string(),
            assigned_at: at(secs),
            worktree_path: PathBuf::from(format!("/ws/{}", slot_name(slot))),
        }
    }

    fn full_pool() -> PoolState {
        let mut state = PoolState::empty(4);
        state.assign(assignment(1, "b-3", 3));
        state.assign(assignment(2, "b-1", 1));
        state.assign(assignment(3, "b-4", 4));
        state.assign(assignment(4, "b-2", 2));
        state
    }

    #[test]
    fn slot_names_are_zero_padded() {
        assert_eq!(slot_name(1), "orchard-slot-01");
        assert_eq!(slot_name(12), "orchard-slot-12");
    }

    #[test]
    fn existing_branch_is_reused() {
        let state = full_pool();
        let choice = choose_slot(&state, "b-4", false).expect("choice");
        assert_eq!(choice, SlotChoice::Existing(assignment(3, "b-4", 4)));
    }

    #[test]
    fn free_slot_is_lowest_unassigned() {
        let mut state = PoolState::empty(3);
        state.assign(assignment(1, "a", 1));
        state.assign(assignment(3, "c", 1));
        assert_eq!(
            choose_slot(&state, "new", false).expect("choice"),
            SlotChoice::Free(slot_name(2))
        );
    }

    #[test]
    fn full_pool_without_force_names_occupants() {
        let err = choose_slot(&full_pool(), "new", false).expect_err("full");
        match err {
            OrchardError::PoolExhausted {
                pool_size,
                occupants,
            } => {
                assert_eq!(pool_size, 4);
                assert_eq!(occupants.len(), 4);
                assert_eq!(occupants[0], (slot_name(1), "b-3".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn force_evicts_oldest_assignment() {
        let choice = choose_slot(&full_pool(), "new", true).expect("choice");
        assert_eq!(
            choice,
            SlotChoice::Evict {
                slot: slot_name(2),
                victims: vec![assignment(2, "b-1", 1)],
            }
        );
    }

    #[test]
    fn eviction_ties_break_by_slot_name() {
        let mut state = PoolState::empty(2);
        state.assign(assignment(2, "late-name", 5));
        state.assign(assignment(1, "early-name", 5));
        let choice = choose_slot(&state, "new", true).expect("choice");
        assert_eq!(
            choice,
            SlotChoice::Evict {
                slot: slot_name(1),
                victims: vec![assignment(1, "early-name", 5)],
            }
        );
    }

    #[test]
    fn shrunk_pool_counts_assignments_beyond_size() {
        let state = full_pool().with_pool_size(2);
        assert!(state.is_full());
        assert_eq!(state.find_inactive_slot(), None);
    }

    #[test]
    fn forced_choice_on_shrunk_pool_evicts_down_to_size() {
        let state = full_pool().with_pool_size(2);
        let choice = choose_slot(&state, "new", true).expect("choice");
        assert_eq!(
            choice,
            SlotChoice::Evict {
                slot: slot_name(1),
                victims: vec![
                    assignment(2, "b-1", 1),
                    assignment(4, "b-2", 2),
                    assignment(1, "b-3", 3),
                ],
            }
        );
    }

    #[test]
    fn note_objective_marks_known_slot() {
        let mut state = PoolState::empty(2);
        state.ensure_slot(&slot_name(1), Path::new("/ws/orchard-slot-01"));
        state.note_objective(&slot_name(1), "12");
        state.note_objective(&slot_name(2), "12");
        assert_eq!(state.slots.len(), 1);
        assert_eq!(state.slots[0].last_objective.as_deref(), Some("12"));
    }

    #[test]
    fn assign_replaces_in_place() {
        let mut state = full_pool();
        state.assign(assignment(1, "b-3-stacked", 3));
        assert_eq!(state.assignments.len(), 4);
        assert_eq!(
            state
                .find_assignment_for_slot(&slot_name(1))
                .map(|a| a.branch_name.as_str()),
            Some("b-3-stacked")
        );
    }
}
