//! Git adapter for orchard commands.
//!
//! Slots are git worktrees of one repository. Orchard only needs a handful of
//! porcelain operations, so we keep a small, explicit wrapper around `git`
//! subprocess calls. Every call goes through [`Tool`], so it shares the
//! configured timeout and output bound.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::Tool;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_OUTPUT_LIMIT: usize = 1_000_000;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Worktree and branch operations the slot pool depends on.
pub trait WorkspaceProvider {
    /// True when `path` holds a checked-out worktree.
    fn workspace_exists(&self, path: &Path) -> bool;
    /// Create a worktree at `path` on `branch`, cutting the branch from
    /// `parent` when it does not exist yet.
    fn add_workspace(&self, path: &Path, branch: &str, parent: &str) -> Result<()>;
    /// Create `branch` at `start_point` without checking it out.
    fn create_branch(&self, path: &Path, branch: &str, start_point: &str) -> Result<()>;
    fn checkout_branch(&self, path: &Path, branch: &str) -> Result<()>;
    fn remove_workspace(&self, path: &Path) -> Result<()>;
    /// Any staged, unstaged, or untracked change counts.
    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool>;
    fn local_branches(&self) -> Result<Vec<String>>;
    /// Branch checked out at `path`.
    fn current_branch_at(&self, path: &Path) -> Result<String>;
}

/// Pushes a branch holding a single empty commit; used to anchor draft-PR plans.
pub trait BranchPublisher {
    fn publish_empty_branch(&self, branch: &str, base: &str, message: &str) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    tool: Tool,
}

impl Git {
    /// Git in `workdir` with default limits.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self::with_tool(Tool::new("git", workdir, DEFAULT_TIMEOUT, DEFAULT_OUTPUT_LIMIT))
    }

    /// Git driven through `tool`, whose program should be `git`.
    pub fn with_tool(tool: Tool) -> Self {
        Self { tool }
    }

    pub fn workdir(&self) -> &Path {
        self.tool.workdir()
    }

    /// Same limits, different worktree.
    fn at(&self, path: &Path) -> Git {
        Self::with_tool(self.tool.with_workdir(path))
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD in {}", self.workdir().display()));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Top-level directory of the checkout containing `workdir`.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Shared `.git` directory, even when `workdir` is a linked worktree.
    pub fn common_dir(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--git-common-dir"])?;
        let raw = PathBuf::from(out.trim());
        if raw.is_absolute() {
            return Ok(raw);
        }
        Ok(self.workdir().join(raw))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        let output = self
            .tool
            .run(&["show-ref", "--verify", "--quiet", &reference], None)?;
        if output.timed_out {
            return Err(anyhow!("git show-ref {reference} timed out"));
        }
        Ok(output.status.success())
    }

    /// Stdout of a successful git call.
    fn run_capture(&self, args: &[&str]) -> Result<String> {
        self.tool.run_checked(args, None)
    }
}

impl WorkspaceProvider for Git {
    fn workspace_exists(&self, path: &Path) -> bool {
        path.join(".git").exists()
    }

    #[instrument(skip_all, fields(path = %path.display(), branch, parent))]
    fn add_workspace(&self, path: &Path, branch: &str, parent: &str) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        let target = path.to_string_lossy();
        if self.branch_exists(branch)? {
            debug!("adding worktree for existing branch");
            self.run_capture(&["worktree", "add", &target, branch])?;
        } else {
            debug!("adding worktree with new branch");
            self.run_capture(&["worktree", "add", "-b", branch, &target, parent])?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(branch, start_point))]
    fn create_branch(&self, path: &Path, branch: &str, start_point: &str) -> Result<()> {
        self.at(path).run_capture(&["branch", branch, start_point])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    fn checkout_branch(&self, path: &Path, branch: &str) -> Result<()> {
        debug!(path = %path.display(), "checking out branch");
        self.at(path).run_capture(&["checkout", branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn remove_workspace(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy();
        self.run_capture(&["worktree", "remove", &target])?;
        Ok(())
    }

    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool> {
        let entries = self.at(path).status_porcelain()?;
        if !entries.is_empty() {
            debug!(path = %path.display(), count = entries.len(), "worktree has changes");
        }
        Ok(!entries.is_empty())
    }

    fn local_branches(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn current_branch_at(&self, path: &Path) -> Result<String> {
        self.at(path).current_branch()
    }
}

impl BranchPublisher for Git {
    #[instrument(skip_all, fields(branch, base))]
    fn publish_empty_branch(&self, branch: &str, base: &str, message: &str) -> Result<()> {
        let tree_ref = format!("{base}^{{tree}}");
        let tree = self.run_capture(&["rev-parse", &tree_ref])?;
        let commit = self.run_capture(&["commit-tree", tree.trim(), "-p", base, "-m", message])?;
        self.run_capture(&["branch", branch, commit.trim()])?;
        debug!("pushing plan branch");
        self.run_capture(&["push", "-u", "origin", branch])?;
        Ok(())
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
