//! Plan lifecycle store.
//!
//! A plan is a tracking record (issue or draft pull request) whose body starts
//! with a `plan-header` metadata block, followed by the human-authored plan
//! content. Lifecycle events are appended as comments carrying `plan-event`
//! blocks. The two backends differ only in how the record is created and in
//! how landing closes it; everything else is shared through provided methods
//! on [`PlanStore`].

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::metadata::{PLAN_EVENT, PLAN_HEADER, parse_block, render_block, strip_blocks};
use crate::core::plan::{
    HEADER_SCHEMA_VERSION, KEY_LIFECYCLE_STAGE, Plan, derive_title, order_events,
    parse_record_number, slugify, validate_content,
};
use crate::core::types::{EventKind, LifecycleStage, PlanBackendKind, PlanEvent, RecordState};
use crate::error::OrchardError;
use crate::io::git::BranchPublisher;
use crate::io::github::{LabelSpec, NewRecord, Record, RecordProvider};

const KEY_SCHEMA_VERSION: &str = "schema_version";
const LABEL_COLOR: &str = "0e8a16";
const LABEL_DESCRIPTION: &str = "Managed by orchard";

/// Input for [`PlanStore::create`].
#[derive(Debug, Clone, Default)]
pub struct CreatePlan {
    pub content: String,
    /// Explicit title; derived from the content when absent.
    pub title: Option<String>,
    /// Labels in addition to the configured plan label.
    pub labels: Vec<String>,
    /// Initial header metadata (`objective_id`, `node_id`, ...).
    pub metadata: BTreeMap<String, Value>,
}

fn compose_body(header: &BTreeMap<String, Value>, content: &str) -> Result<String> {
    let block = render_block(PLAN_HEADER, header).context("render plan header")?;
    Ok(format!("{block}\n\n{}\n", content.trim()))
}

fn read_header(record: &Record) -> Result<Option<BTreeMap<String, Value>>> {
    parse_block(&record.body, PLAN_HEADER)
        .with_context(|| format!("parse plan header of #{}", record.number))
}

fn plan_from_record(record: Record, backend: PlanBackendKind) -> Result<Plan> {
    let Some(mut metadata) = read_header(&record)? else {
        return Err(OrchardError::PlanNotFound(record.number.to_string()).into());
    };
    metadata.remove(KEY_SCHEMA_VERSION);
    Ok(Plan {
        identifier: record.number.to_string(),
        title: record.title,
        body: strip_blocks(&record.body),
        state: record.state,
        url: record.url,
        labels: record.labels,
        assignees: record.assignees,
        created_at: record.created_at,
        updated_at: record.updated_at,
        metadata,
        backend,
    })
}

fn render_event(event: &PlanEvent) -> Result<String> {
    let block = render_block(PLAN_EVENT, event).context("render plan event")?;
    Ok(format!("orchard: `{}`\n\n{block}", event.kind.as_str()))
}

/// Lifecycle operations over plan records.
pub trait PlanStore {
    fn backend(&self) -> PlanBackendKind;
    fn records(&self) -> &dyn RecordProvider;
    fn plan_label(&self) -> &str;

    /// Create the backing record for a new plan.
    fn create_record(&self, record: &NewRecord) -> Result<Record>;

    /// Footer that makes an implementing pull request close this plan on merge.
    fn closing_reference(&self, id: &str) -> Option<String>;

    /// Whether landing should close the plan record explicitly.
    fn closes_on_land(&self) -> bool;

    fn fetch_record(&self, id: &str) -> Result<Record> {
        let number = parse_record_number(id)?;
        self.records()
            .get_record(number)
            .with_context(|| format!("fetch plan #{number}"))?
            .ok_or_else(|| OrchardError::PlanNotFound(number.to_string()).into())
    }

    /// Create any of `labels` that do not exist yet.
    fn ensure_labels(&self, labels: &[String]) -> Result<()> {
        for name in labels {
            if self.records().label_exists(name)? {
                continue;
            }
            debug!(label = %name, "creating missing label");
            self.records().create_label(&LabelSpec {
                name: name.clone(),
                color: LABEL_COLOR.to_string(),
                description: LABEL_DESCRIPTION.to_string(),
            })?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(backend = self.backend().as_str()))]
    fn create(&self, request: &CreatePlan) -> Result<Plan> {
        let content = validate_content(&request.content)?;
        let title = match request.title.as_deref().map(str::trim) {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            _ => derive_title(content).ok_or(OrchardError::EmptyContent)?,
        };

        let mut labels = vec![self.plan_label().to_string()];
        for label in &request.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        self.ensure_labels(&labels)?;

        let mut header = request.metadata.clone();
        header.insert(KEY_SCHEMA_VERSION.to_string(), HEADER_SCHEMA_VERSION.into());
        header.insert(
            KEY_LIFECYCLE_STAGE.to_string(),
            LifecycleStage::Created.as_str().into(),
        );
        let record = self.create_record(&NewRecord {
            title,
            body: compose_body(&header, content)?,
            labels,
        })?;
        let plan = plan_from_record(record, self.backend())?;
        self.append_event(&plan.identifier, &PlanEvent::new(EventKind::Created, Utc::now()))?;
        info!(plan = %plan.identifier, "plan created");
        Ok(plan)
    }

    fn get(&self, id: &str) -> Result<Plan> {
        plan_from_record(self.fetch_record(id)?, self.backend())
    }

    /// Replace the plan content, keeping the header.
    fn update_body(&self, id: &str, content: &str) -> Result<()> {
        let content = validate_content(content)?;
        let record = self.fetch_record(id)?;
        let header = read_header(&record)?
            .ok_or_else(|| OrchardError::PlanNotFound(record.number.to_string()))?;
        self.records()
            .update_body(record.number, &compose_body(&header, content)?)
    }

    /// Merge `entries` into the header.
    fn update_metadata(&self, id: &str, entries: &BTreeMap<String, Value>) -> Result<Plan> {
        let mut record = self.fetch_record(id)?;
        let mut header = read_header(&record)?
            .ok_or_else(|| OrchardError::PlanNotFound(record.number.to_string()))?;
        header.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        let body = compose_body(&header, &strip_blocks(&record.body))?;
        self.records().update_body(record.number, &body)?;
        record.body = body;
        plan_from_record(record, self.backend())
    }

    fn update_labels(&self, id: &str, labels: &[String]) -> Result<()> {
        let number = parse_record_number(id)?;
        self.ensure_labels(labels)?;
        self.records().update_labels(number, labels)
    }

    fn append_event(&self, id: &str, event: &PlanEvent) -> Result<()> {
        let number = parse_record_number(id)?;
        self.records()
            .add_comment(number, &render_event(event)?)
            .with_context(|| format!("append {} event to plan #{number}", event.kind.as_str()))?;
        Ok(())
    }

    /// Event log ordered by timestamp; comments without an event block are skipped.
    fn list_events(&self, id: &str) -> Result<Vec<PlanEvent>> {
        let number = parse_record_number(id)?;
        let mut events = Vec::new();
        for comment in self.records().list_comments(number)? {
            match parse_block::<PlanEvent>(&comment.body, PLAN_EVENT) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => warn!(comment = comment.id, err = %err, "skipping malformed event block"),
            }
        }
        Ok(order_events(events))
    }

    /// Move forward to `stage`, recording the matching event with `data`.
    #[instrument(skip_all, fields(id, stage = stage.as_str()))]
    fn advance(&self, id: &str, stage: LifecycleStage, data: BTreeMap<String, Value>) -> Result<Plan> {
        let plan = self.get(id)?;
        let current = plan.lifecycle_stage();
        if !current.can_advance_to(stage) {
            return Err(OrchardError::InvalidTransition {
                plan: plan.identifier,
                from: current.to_string(),
                to: stage.to_string(),
            }
            .into());
        }
        let entries = BTreeMap::from([(KEY_LIFECYCLE_STAGE.to_string(), Value::from(stage.as_str()))]);
        let updated = self.update_metadata(&plan.identifier, &entries)?;
        let mut event = PlanEvent::new(stage.event_kind(), Utc::now());
        event.data = data;
        self.append_event(&plan.identifier, &event)?;
        info!(from = current.as_str(), "plan advanced");
        Ok(updated)
    }

    /// Abandon the plan: stage `closed` and a closed record.
    fn close(&self, id: &str) -> Result<Plan> {
        let plan = self.advance(id, LifecycleStage::Closed, BTreeMap::new())?;
        let number = parse_record_number(&plan.identifier)?;
        self.records().set_state(number, RecordState::Closed)?;
        self.get(&plan.identifier)
    }

    /// Reopen the record; a terminal stage goes back to `queued`.
    ///
    /// An open plan in a live stage is returned unchanged, without an event.
    fn reopen(&self, id: &str) -> Result<Plan> {
        let plan = self.get(id)?;
        let number = parse_record_number(&plan.identifier)?;
        let previous = plan.lifecycle_stage();
        if plan.state == RecordState::Open && !previous.is_terminal() {
            debug!(plan = %plan.identifier, stage = %previous, "plan already open");
            return Ok(plan);
        }
        if plan.state == RecordState::Closed {
            self.records().set_state(number, RecordState::Open)?;
        }
        if previous.is_terminal() {
            let entries = BTreeMap::from([(
                KEY_LIFECYCLE_STAGE.to_string(),
                Value::from(LifecycleStage::Queued.as_str()),
            )]);
            self.update_metadata(&plan.identifier, &entries)?;
        }
        let event = PlanEvent::new(EventKind::Reopened, Utc::now()).with("previous_stage", previous.as_str());
        self.append_event(&plan.identifier, &event)?;
        self.get(&plan.identifier)
    }
}

/// Plans backed by issues.
pub struct IssuePlanStore<'a, R: RecordProvider> {
    records: &'a R,
    plan_label: String,
}

impl<'a, R: RecordProvider> IssuePlanStore<'a, R> {
    pub fn new(records: &'a R, plan_label: impl Into<String>) -> Self {
        Self {
            records,
            plan_label: plan_label.into(),
        }
    }
}

impl<R: RecordProvider> PlanStore for IssuePlanStore<'_, R> {
    fn backend(&self) -> PlanBackendKind {
        PlanBackendKind::Issue
    }

    fn records(&self) -> &dyn RecordProvider {
        self.records
    }

    fn plan_label(&self) -> &str {
        &self.plan_label
    }

    fn create_record(&self, record: &NewRecord) -> Result<Record> {
        self.records.create_issue(record)
    }

    fn closing_reference(&self, id: &str) -> Option<String> {
        let number = parse_record_number(id).ok()?;
        Some(format!("Closes #{number}"))
    }

    fn closes_on_land(&self) -> bool {
        true
    }
}

/// Plans backed by draft pull requests on a dedicated plan branch.
pub struct DraftPrPlanStore<'a, R: RecordProvider, B: BranchPublisher> {
    records: &'a R,
    publisher: &'a B,
    plan_label: String,
    trunk: String,
}

impl<'a, R: RecordProvider, B: BranchPublisher> DraftPrPlanStore<'a, R, B> {
    pub fn new(
        records: &'a R,
        publisher: &'a B,
        plan_label: impl Into<String>,
        trunk: impl Into<String>,
    ) -> Self {
        Self {
            records,
            publisher,
            plan_label: plan_label.into(),
            trunk: trunk.into(),
        }
    }
}

/// `plan/<slug>-<timestamp>` branch anchoring a draft-PR plan.
pub fn plan_record_branch(title: &str, now: chrono::DateTime<Utc>) -> String {
    let slug = slugify(title);
    let stamp = now.format("%Y%m%d%H%M%S");
    if slug.is_empty() {
        return format!("plan/{stamp}");
    }
    format!("plan/{slug}-{stamp}")
}

impl<R: RecordProvider, B: BranchPublisher> PlanStore for DraftPrPlanStore<'_, R, B> {
    fn backend(&self) -> PlanBackendKind {
        PlanBackendKind::DraftPr
    }

    fn records(&self) -> &dyn RecordProvider {
        self.records
    }

    fn plan_label(&self) -> &str {
        &self.plan_label
    }

    fn create_record(&self, record: &NewRecord) -> Result<Record> {
        let branch = plan_record_branch(&record.title, Utc::now());
        self.publisher
            .publish_empty_branch(&branch, &self.trunk, &format!("plan: {}", record.title))
            .with_context(|| format!("publish plan branch {branch}"))?;
        self.records.create_draft_pr(record, &branch, &self.trunk)
    }

    fn closing_reference(&self, _id: &str) -> Option<String> {
        None
    }

    fn closes_on_land(&self) -> bool {
        false
    }
}
