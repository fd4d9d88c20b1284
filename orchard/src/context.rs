//! Runtime wiring for CLI commands.
//!
//! Resolves the repository, loads configuration, and builds the real
//! collaborators (`git`, `gh`, `gt`). The code host repository is resolved
//! lazily so purely local commands never call `gh`.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::topology::BranchTopology;
use crate::core::types::PlanBackendKind;
use crate::io::config::{OrchardConfig, load_config};
use crate::io::dispatch::GhWorkflowDispatcher;
use crate::io::git::Git;
use crate::io::github::GhCli;
use crate::io::graphite::Graphite;
use crate::io::init::OrchardPaths;
use crate::io::pool_store::JsonPoolStore;
use crate::io::process::Tool;
use crate::io::roadmap_store::RecordRoadmapStore;
use crate::plans::{DraftPrPlanStore, IssuePlanStore, PlanStore};
use crate::slots::SlotPool;

pub struct OrchardContext {
    pub config: OrchardConfig,
    pub repo_root: PathBuf,
    /// Directory name identifying this repository under the state and workspace roots.
    pub repo_key: String,
    pub git: Git,
    pub graphite: Graphite,
    pub topology: BranchTopology,
    pool_store: JsonPoolStore,
    slots_dir: PathBuf,
    records: OnceCell<GhCli>,
}

impl OrchardContext {
    /// Build the context for the repository containing `cwd`.
    pub fn load(cwd: &Path) -> Result<Self> {
        let probe = Git::new(cwd);
        let repo_root = probe.toplevel().context("locate repository root")?;
        let paths = OrchardPaths::new(&repo_root);
        let config = load_config(&paths.config_path)?;

        let git = Git::with_tool(tool(&config, "git", &repo_root));
        let common_dir = git.common_dir()?;
        let repo_key = repo_key(&common_dir)?;
        let pool_store = JsonPoolStore::new(config.state_dir()?.join(&repo_key).join("pool.json"));
        let slots_dir = config.workspaces_dir()?.join(&repo_key);
        let graphite = Graphite::new(&common_dir, tool(&config, "gt", &repo_root));
        let topology = BranchTopology::new(&config.trunk_branch, config.stacked_branches);
        debug!(root = %repo_root.display(), repo_key = %repo_key, "loaded orchard context");

        Ok(Self {
            config,
            repo_root,
            repo_key,
            git,
            graphite,
            topology,
            pool_store,
            slots_dir,
            records: OnceCell::new(),
        })
    }

    /// Code host records for this repository.
    pub fn records(&self) -> Result<&GhCli> {
        if let Some(records) = self.records.get() {
            return Ok(records);
        }
        let records = GhCli::detect(self.tool("gh"))?;
        Ok(self.records.get_or_init(|| records))
    }

    pub fn plans(&self) -> Result<Box<dyn PlanStore + '_>> {
        let records = self.records()?;
        let label = self.config.plan_label.as_str();
        Ok(match self.config.plan_backend {
            PlanBackendKind::Issue => Box::new(IssuePlanStore::new(records, label)),
            PlanBackendKind::DraftPr => Box::new(DraftPrPlanStore::new(
                records,
                &self.git,
                label,
                self.config.trunk_branch.as_str(),
            )),
        })
    }

    pub fn roadmaps(&self) -> Result<RecordRoadmapStore<'_, GhCli>> {
        Ok(RecordRoadmapStore::new(self.records()?))
    }

    pub fn slot_pool(&self) -> SlotPool<'_, JsonPoolStore, Git> {
        SlotPool::new(&self.pool_store, &self.git, self.config.pool_size, &self.slots_dir)
    }

    pub fn dispatcher(&self) -> GhWorkflowDispatcher {
        GhWorkflowDispatcher::new(
            self.tool("gh"),
            self.config.dispatch.workflow.as_str(),
            self.config.dispatch_ref(),
        )
    }

    pub fn tool(&self, program: &str) -> Tool {
        tool(&self.config, program, &self.repo_root)
    }
}

fn tool(config: &OrchardConfig, program: &str, workdir: &Path) -> Tool {
    Tool::new(
        program,
        workdir,
        Duration::from_secs(config.command_timeout_secs),
        config.output_limit_bytes,
    )
}

/// Name of the directory that owns the git common dir.
///
/// Linked worktrees share the common dir, so every slot of a repository maps
/// to the same key.
pub fn repo_key(common_dir: &Path) -> Result<String> {
    let canonical = common_dir
        .canonicalize()
        .with_context(|| format!("resolve {}", common_dir.display()))?;
    let owner = if canonical.file_name().is_some_and(|name| name == ".git") {
        canonical.parent().unwrap_or(&canonical)
    } else {
        canonical.as_path()
    };
    owner
        .file_name()
        .map(|name| name.to_string_lossy().trim_end_matches(".git").to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("cannot derive repository key from {}", canonical.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_key_uses_owner_of_dot_git() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git_dir = dir.path().join("widgets").join(".git");
        std::fs::create_dir_all(&git_dir).expect("mkdir");
        assert_eq!(repo_key(&git_dir).expect("key"), "widgets");
    }

    #[test]
    fn repo_key_strips_bare_suffix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bare = dir.path().join("widgets.git");
        std::fs::create_dir_all(&bare).expect("mkdir");
        assert_eq!(repo_key(&bare).expect("key"), "widgets");
    }

    #[test]
    fn loads_defaults_for_fresh_repository() {
        let repo = crate::test_support::TestRepo::new().expect("repo");
        let ctx = OrchardContext::load(&repo.path()).expect("context");
        assert_eq!(ctx.repo_key, "repo");
        assert_eq!(ctx.config.trunk_branch, "main");
        assert!(!ctx.topology.stacked);
        assert_eq!(ctx.git.workdir(), ctx.repo_root.as_path());
    }
}
