//! Structured, user-actionable failures raised by the scheduler core.
//!
//! Orchestration code works in `anyhow::Result` and attaches context as errors
//! bubble up. Failures the user can act on are raised as [`OrchardError`] so the
//! CLI can recover them from the chain, print a remediation hint, and pick a
//! stable exit code.

use std::path::PathBuf;

use thiserror::Error;

/// Broad failure classes used for exit codes and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A bounded resource is exhausted.
    Capacity,
    /// The environment is not in a state that allows the operation.
    Precondition,
    /// A referenced plan, objective, step, or slot does not exist.
    NotFound,
    /// Input or stored data is malformed.
    Validation,
    /// A persisted document changed underneath a read-modify-write.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchardError {
    #[error("slot pool is full ({pool_size} slots in use): {}", format_occupants(.occupants))]
    PoolExhausted {
        pool_size: usize,
        /// `(slot, branch)` pairs currently holding the pool.
        occupants: Vec<(String, String)>,
    },

    #[error("slot '{slot}' has uncommitted changes in {}", .path.display())]
    UncommittedChanges { slot: String, path: PathBuf },

    #[error("parent branch '{branch}' is not tracked by gt")]
    UntrackedParent { branch: String, trunk: String },

    #[error("plan #{0} not found")]
    PlanNotFound(String),

    #[error("objective #{0} not found")]
    ObjectiveNotFound(String),

    #[error("objective #{0} has no roadmap block")]
    RoadmapMissing(String),

    #[error("step '{node}' not found in objective #{objective}")]
    NodeNotFound { objective: String, node: String },

    #[error("slot '{0}' not found")]
    SlotNotFound(String),

    #[error("slot '{0}' is not assigned")]
    SlotNotAssigned(String),

    #[error("no pending unblocked nodes in objective #{0}")]
    NoUnblockedNodes(String),

    #[error("plan content is empty")]
    EmptyContent,

    #[error("invalid roadmap: {}", .0.join("; "))]
    InvalidRoadmap(Vec<String>),

    #[error("invalid {field}: {reason}")]
    InvalidOption { field: String, reason: String },

    #[error("plan #{plan} cannot move from {from} to {to}")]
    InvalidTransition {
        plan: String,
        from: String,
        to: String,
    },

    #[error("{0} changed since it was loaded")]
    Conflict(String),
}

impl OrchardError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PoolExhausted { .. } => ErrorKind::Capacity,
            Self::UncommittedChanges { .. } | Self::UntrackedParent { .. } => {
                ErrorKind::Precondition
            }
            Self::PlanNotFound(_)
            | Self::ObjectiveNotFound(_)
            | Self::RoadmapMissing(_)
            | Self::NodeNotFound { .. }
            | Self::SlotNotFound(_)
            | Self::SlotNotAssigned(_)
            | Self::NoUnblockedNodes(_) => ErrorKind::NotFound,
            Self::EmptyContent
            | Self::InvalidRoadmap(_)
            | Self::InvalidOption { .. }
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
        }
    }

    /// Concrete next step for the user, when one exists.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::PoolExhausted { occupants, .. } => {
                let example = occupants
                    .first()
                    .map(|(slot, _)| slot.as_str())
                    .unwrap_or("<slot>");
                Some(format!(
                    "free a slot with `orchard slot unassign {example}`, or pass --force to evict the oldest assignment"
                ))
            }
            Self::UncommittedChanges { slot, path } => Some(format!(
                "commit or stash the changes (`git -C {} stash`), or release the slot with `orchard slot unassign {slot}`",
                path.display()
            )),
            Self::UntrackedParent { branch, trunk } => Some(format!(
                "run `git checkout {branch}` then `gt track --parent {trunk}`"
            )),
            Self::RoadmapMissing(objective) => Some(format!(
                "add an objective-roadmap block to the body of #{objective}"
            )),
            Self::SlotNotFound(_) | Self::SlotNotAssigned(_) => {
                Some("list slots with `orchard slot list`".to_string())
            }
            Self::NoUnblockedNodes(objective) => Some(format!(
                "inspect step status with `orchard objective show {objective}`; steps unblock once their dependencies land"
            )),
            Self::InvalidTransition { plan, .. } => Some(format!(
                "reopen the plan first with `orchard plan reopen {plan}`"
            )),
            Self::Conflict(_) => {
                Some("another orchard command updated it concurrently; re-run the command".to_string())
            }
            _ => None,
        }
    }
}

fn format_occupants(occupants: &[(String, String)]) -> String {
    occupants
        .iter()
        .map(|(slot, branch)| format!("{slot} -> {branch}"))
        .collect::<Vec<_>>()
        .join(", ")
}
