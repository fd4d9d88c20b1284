//! Orchard configuration stored under `.orchard/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::PlanBackendKind;
use crate::io::instruction::normalize_model;

/// Orchard configuration (TOML).
///
/// Edited by humans and committed with the repository. Missing fields fall back
/// to defaults; machine-local directories default to `~/.orchard/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchardConfig {
    pub trunk_branch: String,

    /// Number of reusable workspace slots. Overrides any persisted pool size.
    pub pool_size: usize,

    /// Stack new work on the current branch instead of trunk.
    pub stacked_branches: bool,

    /// Record type backing new plans.
    pub plan_backend: PlanBackendKind,

    /// Label applied to every plan record.
    pub plan_label: String,

    /// Wall-clock limit for each `gh`/`gt` invocation.
    pub command_timeout_secs: u64,

    /// Truncate captured subprocess output beyond this many bytes.
    pub output_limit_bytes: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspaces_dir: Option<PathBuf>,

    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Workflow file triggered per dispatched step.
    pub workflow: String,
    /// Default model passed to the workflow.
    pub model: String,
    /// Ref to run the workflow on; trunk when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workflow: "orchard-implement.yml".to_string(),
            model: "sonnet".to_string(),
            git_ref: None,
        }
    }
}

impl Default for OrchardConfig {
    fn default() -> Self {
        Self {
            trunk_branch: "main".to_string(),
            pool_size: 4,
            stacked_branches: false,
            plan_backend: PlanBackendKind::Issue,
            plan_label: "orchard-plan".to_string(),
            command_timeout_secs: 120,
            output_limit_bytes: 1_000_000,
            state_dir: None,
            workspaces_dir: None,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl OrchardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trunk_branch.trim().is_empty() {
            return Err(anyhow!("trunk_branch must be non-empty"));
        }
        if self.pool_size == 0 {
            return Err(anyhow!("pool_size must be > 0"));
        }
        if self.plan_label.trim().is_empty() {
            return Err(anyhow!("plan_label must be non-empty"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.dispatch.workflow.trim().is_empty() {
            return Err(anyhow!("dispatch.workflow must be non-empty"));
        }
        normalize_model(&self.dispatch.model).context("dispatch.model")?;
        Ok(())
    }

    /// Directory holding per-repository pool state.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(orchard_home()?.join("state")),
        }
    }

    /// Directory holding per-repository slot worktrees.
    pub fn workspaces_dir(&self) -> Result<PathBuf> {
        match &self.workspaces_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(orchard_home()?.join("workspaces")),
        }
    }

    pub fn dispatch_ref(&self) -> &str {
        self.dispatch.git_ref.as_deref().unwrap_or(&self.trunk_branch)
    }
}

fn orchard_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".orchard"))
        .ok_or_else(|| anyhow!("cannot resolve home directory; set state_dir and workspaces_dir"))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchardConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchardConfig> {
    if !path.exists() {
        let cfg = OrchardConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchardConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchardConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
