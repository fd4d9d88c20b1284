//! Initialization helpers for `.orchard/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{OrchardConfig, write_config};

/// Canonical paths within `.orchard/` for a repository root.
#[derive(Debug, Clone)]
pub struct OrchardPaths {
    pub root: PathBuf,
    pub orchard_dir: PathBuf,
    pub config_path: PathBuf,
}

impl OrchardPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let orchard_dir = root.join(".orchard");
        Self {
            root,
            config_path: orchard_dir.join("config.toml"),
            orchard_dir,
        }
    }
}

/// Options for `init_orchard`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, overwrite an existing config.
    pub force: bool,
    pub pool_size: Option<usize>,
    pub trunk_branch: Option<String>,
}

/// Create `.orchard/config.toml` in `root`.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_orchard(root: &Path, options: &InitOptions) -> Result<OrchardPaths> {
    let paths = OrchardPaths::new(root);
    if paths.orchard_dir.exists() && !paths.orchard_dir.is_dir() {
        return Err(anyhow!("orchard init: .orchard exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "orchard init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.orchard_dir)
        .with_context(|| format!("create directory {}", paths.orchard_dir.display()))?;

    let mut cfg = OrchardConfig::default();
    if let Some(size) = options.pool_size {
        cfg.pool_size = size;
    }
    if let Some(trunk) = &options.trunk_branch {
        cfg.trunk_branch.clone_from(trunk);
    }
    write_config(&paths.config_path, &cfg)?;
    Ok(paths)
}
