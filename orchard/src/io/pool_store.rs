//! Pool state persistence (`<state_dir>/<repo>/pool.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::pool::PoolState;
use crate::error::OrchardError;

/// Whole-document load/save for the slot pool.
pub trait PoolStore {
    /// `None` when no pool has been persisted yet.
    fn load(&self) -> Result<Option<PoolState>>;
    /// Persist `state`, bumping its revision.
    ///
    /// Fails with [`OrchardError::Conflict`] when the stored revision no longer
    /// matches the one `state` was loaded at.
    fn save(&self, state: &mut PoolState) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonPoolStore {
    path: PathBuf,
}

impl JsonPoolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PoolStore for JsonPoolStore {
    fn load(&self) -> Result<Option<PoolState>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no pool state yet");
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read pool state {}", self.path.display()))?;
        let state: PoolState = serde_json::from_str(&contents)
            .with_context(|| format!("parse pool state {}", self.path.display()))?;
        Ok(Some(state))
    }

    fn save(&self, state: &mut PoolState) -> Result<()> {
        let on_disk = self.load()?.map(|s| s.revision).unwrap_or(0);
        if on_disk != state.revision {
            warn!(expected = state.revision, found = on_disk, "pool state revision mismatch");
            return Err(OrchardError::Conflict("pool state".to_string()).into());
        }
        state.revision += 1;
        let mut buf = serde_json::to_string_pretty(state).context("serialize pool state")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)?;
        debug!(revision = state.revision, "pool state saved");
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("pool state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp pool state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace pool state {}", path.display()))?;
    Ok(())
}
