//! Plan records: content rules, titles, branch names, and event ordering.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{LifecycleStage, PlanBackendKind, PlanEvent, RecordState};
use crate::error::OrchardError;

pub const HEADER_SCHEMA_VERSION: &str = "1";
pub const KEY_LIFECYCLE_STAGE: &str = "lifecycle_stage";
pub const KEY_WORKTREE_NAME: &str = "worktree_name";
pub const KEY_BRANCH_NAME: &str = "branch_name";
pub const KEY_OBJECTIVE_ID: &str = "objective_id";
pub const KEY_NODE_ID: &str = "node_id";

const MAX_TITLE_CHARS: usize = 100;
const MAX_SLUG_CHARS: usize = 30;

/// One trackable unit of implementation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub identifier: String,
    pub title: String,
    /// Plan content with orchard metadata blocks removed.
    pub body: String,
    pub state: RecordState,
    pub url: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Free-form header metadata (`worktree_name`, `objective_id`, ...).
    pub metadata: BTreeMap<String, Value>,
    pub backend: PlanBackendKind,
}

impl Plan {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Current stage; plans without a recorded stage are treated as `created`,
    /// or `closed` when the record itself is closed.
    pub fn lifecycle_stage(&self) -> LifecycleStage {
        match self
            .metadata_str(KEY_LIFECYCLE_STAGE)
            .and_then(LifecycleStage::parse)
        {
            Some(stage) => stage,
            None if self.state == RecordState::Closed => LifecycleStage::Closed,
            None => LifecycleStage::Created,
        }
    }

    /// `(objective, node)` when the plan was dispatched from a roadmap step.
    pub fn objective_link(&self) -> Option<(&str, &str)> {
        Some((
            self.metadata_str(KEY_OBJECTIVE_ID)?,
            self.metadata_str(KEY_NODE_ID)?,
        ))
    }
}

/// Reject whitespace-only content; returns the trimmed content.
pub fn validate_content(content: &str) -> Result<&str, OrchardError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(OrchardError::EmptyContent);
    }
    Ok(trimmed)
}

/// Title from the first H1, else the first H2, else the first non-empty line.
pub fn derive_title(content: &str) -> Option<String> {
    heading(content, 1)
        .or_else(|| heading(content, 2))
        .or_else(|| first_line(content))
        .map(|title| truncate_chars(&title, MAX_TITLE_CHARS))
}

fn heading(content: &str, level: usize) -> Option<String> {
    let marker = format!("{} ", "#".repeat(level));
    content.lines().find_map(|line| {
        let text = line.trim_start().strip_prefix(&marker)?.trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}

fn first_line(content: &str) -> Option<String> {
    static MARKDOWN_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:#+\s*|[-*+]\s+|>\s*|\d+\.\s+)").expect("prefix pattern is valid")
    });

    content.lines().find_map(|line| {
        let stripped = MARKDOWN_PREFIX.replace(line.trim(), "");
        let text = stripped.trim_matches(|c| c == '*' || c == '_' || c == '`').trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

/// Lowercase, dash-separated slug safe for branch names.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
        if slug.len() >= MAX_SLUG_CHARS {
            break;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Default implementation branch for a plan: `P<id>-<slug>`.
pub fn plan_branch_name(identifier: &str, title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        return format!("P{identifier}");
    }
    format!("P{identifier}-{slug}")
}

/// Accept `12`, `#12`, or a record URL ending in `/12`.
pub fn parse_record_number(raw: &str) -> Result<u64, OrchardError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let candidate = trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .trim_start_matches('#');
    candidate
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| OrchardError::invalid("record number", format!("'{raw}' is not a number")))
}

/// Order events by timestamp; ties keep arrival order.
pub fn order_events(mut events: Vec<PlanEvent>) -> Vec<PlanEvent> {
    events.sort_by_key(|event| event.timestamp);
    events
}
