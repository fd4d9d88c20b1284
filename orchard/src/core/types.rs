//! Shared deterministic types for orchard core logic.
//!
//! These types define stable contracts between components and the persisted
//! formats (plan headers, event blocks). They must not depend on I/O.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which kind of tracking record backs a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanBackendKind {
    /// An issue-tracker ticket.
    Issue,
    /// A draft pull request acting as the plan record.
    DraftPr,
}

impl PlanBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::DraftPr => "draft-pr",
        }
    }
}

/// Open/closed state of a tracking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordState {
    Open,
    Closed,
}

/// Where a plan is in its lifecycle.
///
/// Stages are ordered; normal operation only moves forward. `Closed` is the
/// abandonment terminal and may be entered from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Created,
    Queued,
    Implementing,
    Submitted,
    Landed,
    Closed,
}

impl LifecycleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Implementing => "implementing",
            Self::Submitted => "submitted",
            Self::Landed => "landed",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "queued" => Some(Self::Queued),
            "implementing" => Some(Self::Implementing),
            "submitted" => Some(Self::Submitted),
            "landed" => Some(Self::Landed),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Landed | Self::Closed)
    }

    /// Whether moving from `self` to `next` is a normal (non-administrative) transition.
    pub fn can_advance_to(self, next: LifecycleStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Closed || next > self
    }

    /// Event recorded when a plan enters this stage.
    pub fn event_kind(self) -> EventKind {
        match self {
            Self::Created => EventKind::Created,
            Self::Queued => EventKind::Queued,
            Self::Implementing => EventKind::Implementing,
            Self::Submitted => EventKind::Submitted,
            Self::Landed => EventKind::Landed,
            Self::Closed => EventKind::Closed,
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entry in a plan's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Queued,
    WorkflowStarted,
    Implementing,
    Progress,
    Submitted,
    Completed,
    Landed,
    Closed,
    Reopened,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::WorkflowStarted => "workflow_started",
            Self::Implementing => "implementing",
            Self::Progress => "progress",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Landed => "landed",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
        }
    }
}

/// Immutable, timestamped entry appended to a plan's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl PlanEvent {
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}
