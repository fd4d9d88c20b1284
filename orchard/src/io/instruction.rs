//! Work instruction rendering for dispatched roadmap steps.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::roadmap::RoadmapNode;
use crate::error::OrchardError;

const DISPATCH_TEMPLATE: &str = include_str!("prompts/dispatch.md");

/// Canonical model name for `raw`, accepting single-letter aliases.
pub fn normalize_model(raw: &str) -> Result<&'static str, OrchardError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "haiku" | "h" => Ok("haiku"),
        "sonnet" | "s" => Ok("sonnet"),
        "opus" | "o" => Ok("opus"),
        other => Err(OrchardError::invalid(
            "model",
            format!("'{other}' (expected haiku, sonnet, opus, or h/s/o)"),
        )),
    }
}

#[derive(Debug, Clone, Serialize)]
struct ObjectiveContext<'a> {
    id: &'a str,
    title: &'a str,
}

/// Inputs for one rendered instruction.
#[derive(Debug, Clone)]
pub struct InstructionInputs<'a> {
    pub objective_id: &'a str,
    pub objective_title: &'a str,
    pub node: &'a RoadmapNode,
    pub phase: &'a str,
    /// Absent on dry runs, where no plan is created.
    pub plan_id: Option<&'a str>,
}

/// Render the instruction handed to the remote runner.
pub fn render_instruction(inputs: &InstructionInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("dispatch", DISPATCH_TEMPLATE)?;
    let template = env.get_template("dispatch")?;
    let rendered = template.render(context! {
        objective => ObjectiveContext { id: inputs.objective_id, title: inputs.objective_title },
        node => inputs.node,
        phase => inputs.phase,
        plan_id => inputs.plan_id,
    })?;
    Ok(rendered.trim().to_string() + "\n")
}
