//! Objective roadmap load/save with schema validation and conflict detection.
//!
//! The roadmap lives in the objective record body as an `objective-roadmap`
//! metadata block. Saves re-read the record and refuse to write when the block
//! changed since it was loaded, so two concurrent dispatchers cannot silently
//! overwrite each other.

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::metadata::{OBJECTIVE_ROADMAP, find_block, render_block, upsert_block};
use crate::core::plan::parse_record_number;
use crate::core::roadmap::Roadmap;
use crate::error::OrchardError;
use crate::io::github::RecordProvider;

const ROADMAP_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/objective_roadmap.v1.schema.json"
));

/// A roadmap together with what it was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadmapSnapshot {
    pub objective: String,
    pub title: String,
    pub body: String,
    /// Block payload exactly as read; compared on save.
    pub raw_block: String,
    pub roadmap: Roadmap,
}

/// Whole-document load/save for objective roadmaps.
pub trait RoadmapStore {
    fn load(&self, objective: &str) -> Result<RoadmapSnapshot>;
    /// Replace the roadmap block. Fails with [`OrchardError::Conflict`] when
    /// the stored block no longer matches `snapshot.raw_block`.
    fn save(&self, snapshot: &RoadmapSnapshot, roadmap: &Roadmap) -> Result<()>;
}

/// `RoadmapStore` over objective records.
pub struct RecordRoadmapStore<'a, R: RecordProvider> {
    records: &'a R,
}

impl<'a, R: RecordProvider> RecordRoadmapStore<'a, R> {
    pub fn new(records: &'a R) -> Self {
        Self { records }
    }

    fn fetch_body(&self, objective: &str) -> Result<(u64, String, String)> {
        let number = parse_record_number(objective)?;
        let record = self
            .records
            .get_record(number)
            .with_context(|| format!("fetch objective #{number}"))?
            .ok_or_else(|| OrchardError::ObjectiveNotFound(number.to_string()))?;
        Ok((number, record.title, record.body))
    }
}

impl<R: RecordProvider> RoadmapStore for RecordRoadmapStore<'_, R> {
    #[instrument(skip_all, fields(objective))]
    fn load(&self, objective: &str) -> Result<RoadmapSnapshot> {
        let (number, title, body) = self.fetch_body(objective)?;
        let raw_block = find_block(&body, OBJECTIVE_ROADMAP)
            .map(|block| block.payload.to_string())
            .ok_or_else(|| OrchardError::RoadmapMissing(number.to_string()))?;
        let roadmap = parse_roadmap(&raw_block)?;
        debug!(nodes = roadmap.nodes.len(), "roadmap loaded");
        Ok(RoadmapSnapshot {
            objective: number.to_string(),
            title,
            body,
            raw_block,
            roadmap,
        })
    }

    #[instrument(skip_all, fields(objective = %snapshot.objective))]
    fn save(&self, snapshot: &RoadmapSnapshot, roadmap: &Roadmap) -> Result<()> {
        let (number, _, current_body) = self.fetch_body(&snapshot.objective)?;
        let current_block = find_block(&current_body, OBJECTIVE_ROADMAP).map(|b| b.payload);
        if current_block != Some(snapshot.raw_block.as_str()) {
            warn!("roadmap block changed since load");
            return Err(OrchardError::Conflict(format!("roadmap of objective #{number}")).into());
        }
        let rendered = render_block(OBJECTIVE_ROADMAP, roadmap).context("render roadmap block")?;
        let body = upsert_block(&current_body, OBJECTIVE_ROADMAP, &rendered);
        self.records
            .update_body(number, &body)
            .with_context(|| format!("update objective #{number}"))?;
        debug!("roadmap saved");
        Ok(())
    }
}

/// Parse and schema-validate a roadmap block payload.
pub fn parse_roadmap(payload: &str) -> Result<Roadmap> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|err| OrchardError::InvalidRoadmap(vec![format!("malformed JSON: {err}")]))?;
    let schema: Value = serde_json::from_str(ROADMAP_SCHEMA).context("parse roadmap schema")?;
    let validator =
        validator_for(&schema).map_err(|err| anyhow!("invalid roadmap schema: {}", err))?;
    let messages: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(OrchardError::InvalidRoadmap(messages).into());
    }
    let roadmap: Roadmap = serde_json::from_value(value).context("deserialize roadmap")?;
    Ok(roadmap)
}
