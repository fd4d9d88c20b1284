//! Stacked-branch tool adapter (`gt`).
//!
//! Tracking state is read straight from Graphite's persisted branch cache in the
//! shared git directory; writes go through the `gt` CLI.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::io::process::Tool;

const CACHE_FILE: &str = ".graphite_cache_persist";

/// Stack tracking the topology resolver and work start depend on.
pub trait StackProvider {
    fn is_branch_tracked(&self, branch: &str) -> Result<bool>;
    /// Register `branch` as stacked on `parent`.
    fn track_branch(&self, branch: &str, parent: &str) -> Result<()>;
}

#[derive(Debug, Default, Deserialize)]
struct BranchCache {
    #[serde(default)]
    branches: Vec<(String, CachedBranch)>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedBranch {
    #[serde(default)]
    parent_branch_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Graphite {
    git_common_dir: PathBuf,
    gt: Tool,
}

impl Graphite {
    pub fn new(git_common_dir: impl Into<PathBuf>, gt: Tool) -> Self {
        Self {
            git_common_dir: git_common_dir.into(),
            gt,
        }
    }

    fn cache_path(&self) -> PathBuf {
        self.git_common_dir.join(CACHE_FILE)
    }

    /// Parent recorded for `branch`, if it is tracked.
    pub fn parent_of(&self, branch: &str) -> Result<Option<String>> {
        let cache = load_cache(&self.cache_path())?;
        Ok(cache
            .branches
            .into_iter()
            .find(|(name, _)| name == branch)
            .and_then(|(_, info)| info.parent_branch_name))
    }
}

fn load_cache(path: &Path) -> Result<BranchCache> {
    if !path.exists() {
        debug!(path = %path.display(), "no graphite cache");
        return Ok(BranchCache::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

impl StackProvider for Graphite {
    fn is_branch_tracked(&self, branch: &str) -> Result<bool> {
        let cache = load_cache(&self.cache_path())?;
        let tracked = cache.branches.iter().any(|(name, _)| name == branch);
        debug!(branch, tracked, "graphite tracking lookup");
        Ok(tracked)
    }

    #[instrument(skip_all, fields(branch, parent))]
    fn track_branch(&self, branch: &str, parent: &str) -> Result<()> {
        self.gt
            .run_checked(&["track", branch, "--parent", parent, "--no-interactive"], None)?;
        Ok(())
    }
}
