//! Remote execution trigger.
//!
//! The [`Dispatcher`] trait decouples objective scheduling from the actual
//! runner backend (currently a `workflow_dispatch` workflow). Tests use a
//! recording dispatcher that never spawns processes.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{info, instrument};

use crate::io::process::Tool;

/// Handle for a triggered run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReference {
    pub workflow: String,
    /// Run URL when the backend reports one.
    pub url: Option<String>,
}

/// Abstraction over remote execution backends.
pub trait Dispatcher {
    /// Start one run. `inputs` are flat string parameters passed alongside the
    /// rendered work instruction.
    fn trigger(&self, instruction: &str, inputs: &BTreeMap<String, String>) -> Result<RunReference>;
}

/// Dispatcher that runs `gh workflow run`.
#[derive(Debug, Clone)]
pub struct GhWorkflowDispatcher {
    gh: Tool,
    workflow: String,
    git_ref: String,
}

impl GhWorkflowDispatcher {
    pub fn new(gh: Tool, workflow: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            gh,
            workflow: workflow.into(),
            git_ref: git_ref.into(),
        }
    }
}

impl Dispatcher for GhWorkflowDispatcher {
    #[instrument(skip_all, fields(workflow = %self.workflow))]
    fn trigger(&self, instruction: &str, inputs: &BTreeMap<String, String>) -> Result<RunReference> {
        let fields: Vec<String> = std::iter::once(format!("instruction={instruction}"))
            .chain(inputs.iter().map(|(k, v)| format!("{k}={v}")))
            .collect();
        let mut args = vec!["workflow", "run", self.workflow.as_str(), "--ref", self.git_ref.as_str()];
        for field in &fields {
            args.push("-f");
            args.push(field.as_str());
        }
        let out = self.gh.run_checked(&args, None)?;
        let url = parse_run_url(&out);
        info!(url = ?url, "workflow dispatched");
        Ok(RunReference {
            workflow: self.workflow.clone(),
            url,
        })
    }
}

fn parse_run_url(output: &str) -> Option<String> {
    static RUN_URL: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"https://\S+/actions/runs/\d+").expect("run url pattern is valid")
    });
    RUN_URL.find(output).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_run_url_when_present() {
        let out = "✓ Created workflow_dispatch event for plan.yml at main\nhttps://github.com/o/r/actions/runs/42\n";
        assert_eq!(
            parse_run_url(out).as_deref(),
            Some("https://github.com/o/r/actions/runs/42")
        );
        assert_eq!(parse_run_url("Created workflow_dispatch event"), None);
    }
}
