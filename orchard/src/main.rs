use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchard::context::OrchardContext;
use orchard::core::plan::{KEY_BRANCH_NAME, parse_record_number};
use orchard::core::pool::slot_name;
use orchard::error::OrchardError;
use orchard::exit_codes;
use orchard::io::git::{Git, WorkspaceProvider};
use orchard::io::init::{InitOptions, init_orchard};
use orchard::io::roadmap_store::RoadmapStore;
use orchard::objective::{DispatchOptions, DispatchReport, ObjectiveScheduler};
use orchard::plans::{CreatePlan, PlanStore};
use orchard::slots::{AcquireAction, AcquireRequest};
use orchard::work::{SubmitRequest, land_plan, stack_branch, start_plan, submit_plan};

#[derive(Parser)]
#[command(
    name = "orchard",
    version,
    about = "Slot pool, plan lifecycle, and objective scheduling for stacked work"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.orchard/config.toml` in the repository root.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long)]
        pool_size: Option<usize>,
        #[arg(long)]
        trunk: Option<String>,
    },
    /// Manage workspace slots.
    #[command(subcommand)]
    Slot(SlotCommand),
    /// Manage plans.
    #[command(subcommand)]
    Plan(PlanCommand),
    /// Inspect and dispatch objective roadmaps.
    #[command(subcommand)]
    Objective(ObjectiveCommand),
    /// Branch topology queries.
    #[command(subcommand)]
    Branch(BranchCommand),
}

#[derive(Subcommand)]
enum SlotCommand {
    /// Print slot assignments.
    List,
    /// Assign a slot to a branch.
    Assign {
        branch: String,
        /// Start point when the branch does not exist yet.
        #[arg(long)]
        parent: Option<String>,
        /// Evict the oldest assignment when the pool is full.
        #[arg(short, long)]
        force: bool,
    },
    /// Release a slot; the worktree is kept for reuse.
    Unassign { slot: String },
    /// Start a new branch in a slot on top of its current branch.
    Stack { slot: String, branch: String },
}

#[derive(Subcommand)]
enum PlanCommand {
    /// Create a plan from a markdown file, or stdin when no file is given.
    Create {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long = "label")]
        labels: Vec<String>,
    },
    View { id: String },
    Close { id: String },
    Reopen { id: String },
    /// Print the plan's event log, oldest first.
    Events { id: String },
    /// Acquire a slot and start implementing a plan.
    Start {
        id: String,
        #[arg(short, long)]
        force: bool,
    },
    /// Record the plan's pull request.
    Submit {
        id: String,
        #[arg(long)]
        pr: String,
        /// Branch the pull request targets; defaults to the recorded stack parent.
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        by: Option<String>,
    },
    /// Record that the plan's change merged.
    Land {
        id: String,
        #[arg(long)]
        pr: Option<String>,
    },
}

#[derive(Subcommand)]
enum ObjectiveCommand {
    /// Print the roadmap with step status.
    Show { objective: String },
    /// Print the first dispatchable step, or every one with `--all`.
    Next {
        objective: String,
        #[arg(long)]
        all: bool,
    },
    /// Dispatch the next step, a specific step, or every unblocked step.
    Dispatch {
        objective: String,
        #[arg(long, conflicts_with = "all")]
        node: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        model: Option<String>,
        #[arg(long = "label")]
        labels: Vec<String>,
    },
}

#[derive(Subcommand)]
enum BranchCommand {
    /// Print the parent new work on `branch` would stack on.
    Parent { branch: Option<String> },
}

fn main() {
    orchard::logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => report_error(&err),
    };
    std::process::exit(code);
}

fn report_error(err: &anyhow::Error) -> i32 {
    eprintln!("error: {err:#}");
    match err.chain().find_map(|cause| cause.downcast_ref::<OrchardError>()) {
        Some(domain) => {
            if let Some(hint) = domain.remediation() {
                eprintln!("hint: {hint}");
            }
            exit_codes::for_error(domain)
        }
        None => exit_codes::INVALID,
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init {
            force,
            pool_size,
            trunk,
        } => cmd_init(&cwd, force, pool_size, trunk),
        Command::Slot(cmd) => cmd_slot(&OrchardContext::load(&cwd)?, cmd),
        Command::Plan(cmd) => cmd_plan(&OrchardContext::load(&cwd)?, cmd),
        Command::Objective(cmd) => cmd_objective(&OrchardContext::load(&cwd)?, cmd),
        Command::Branch(BranchCommand::Parent { branch }) => {
            let ctx = OrchardContext::load(&cwd)?;
            let branch = match branch {
                Some(branch) => branch,
                None => ctx.git.current_branch()?,
            };
            println!("{}", ctx.topology.resolve_parent(&branch));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(cwd: &Path, force: bool, pool_size: Option<usize>, trunk: Option<String>) -> Result<i32> {
    let root = Git::new(cwd)
        .toplevel()
        .unwrap_or_else(|_| cwd.to_path_buf());
    let paths = init_orchard(
        &root,
        &InitOptions {
            force,
            pool_size,
            trunk_branch: trunk,
        },
    )?;
    println!("{}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_slot(ctx: &OrchardContext, cmd: SlotCommand) -> Result<i32> {
    let pool = ctx.slot_pool();
    match cmd {
        SlotCommand::List => {
            let state = pool.list()?;
            for index in 1..=state.pool_size {
                let name = slot_name(index);
                match state.find_assignment_for_slot(&name) {
                    Some(a) => println!("{name}\t{}\t{}", a.branch_name, a.assigned_at.to_rfc3339()),
                    None => println!("{name}\t-"),
                }
            }
            // Assignments left over after the pool was shrunk.
            for a in state
                .assignments
                .iter()
                .filter(|a| !(1..=state.pool_size).any(|i| slot_name(i) == a.slot_name))
            {
                println!("{}\t{}\t{}", a.slot_name, a.branch_name, a.assigned_at.to_rfc3339());
            }
        }
        SlotCommand::Assign {
            branch,
            parent,
            force,
        } => {
            let parent = parent.unwrap_or_else(|| ctx.config.trunk_branch.clone());
            let outcome = pool.acquire(AcquireRequest {
                branch: &branch,
                parent: &parent,
                force,
                objective: None,
            })?;
            if let AcquireAction::Evicted { previous_branches } = &outcome.action {
                eprintln!("evicted {}", previous_branches.join(", "));
            }
            println!(
                "{}\t{}",
                outcome.assignment.slot_name,
                outcome.assignment.worktree_path.display()
            );
        }
        SlotCommand::Unassign { slot } => {
            let removed = pool.release(&slot)?;
            println!("{slot}\t{}", removed.branch_name);
        }
        SlotCommand::Stack { slot, branch } => {
            let outcome = stack_branch(&pool, &ctx.graphite, &ctx.topology, &slot, &branch)?;
            println!(
                "{}\t{}\t{}",
                outcome.assignment.slot_name, outcome.assignment.branch_name, outcome.parent
            );
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_plan(ctx: &OrchardContext, cmd: PlanCommand) -> Result<i32> {
    let plans = ctx.plans()?;
    match cmd {
        PlanCommand::Create {
            file,
            title,
            labels,
        } => {
            let content = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("read plan from stdin")?;
                    buf
                }
            };
            let plan = plans.create(&CreatePlan {
                content,
                title,
                labels,
                ..CreatePlan::default()
            })?;
            println!("{}\t{}", plan.identifier, plan.url);
        }
        PlanCommand::View { id } => {
            let plan = plans.get(&id)?;
            println!("#{} {}", plan.identifier, plan.title);
            println!("stage: {}", plan.lifecycle_stage());
            for (key, value) in &plan.metadata {
                println!("{key}: {value}");
            }
            println!("\n{}", plan.body);
        }
        PlanCommand::Close { id } => {
            let plan = plans.close(&id)?;
            println!("{}\t{}", plan.identifier, plan.lifecycle_stage());
        }
        PlanCommand::Reopen { id } => {
            let plan = plans.reopen(&id)?;
            println!("{}\t{}", plan.identifier, plan.lifecycle_stage());
        }
        PlanCommand::Events { id } => {
            for event in plans.list_events(&id)? {
                println!(
                    "{}\t{}\t{}",
                    event.timestamp.to_rfc3339(),
                    event.kind.as_str(),
                    serde_json::to_string(&event.data)?
                );
            }
        }
        PlanCommand::Start { id, force } => {
            let current = ctx.git.current_branch()?;
            let pool = ctx.slot_pool();
            let outcome = start_plan(
                plans.as_ref(),
                &pool,
                &ctx.graphite,
                &ctx.topology,
                &current,
                &id,
                force,
            )?;
            println!(
                "{}\t{}\t{}",
                outcome.slot.assignment.slot_name,
                outcome.branch,
                outcome.slot.assignment.worktree_path.display()
            );
        }
        PlanCommand::Submit { id, pr, parent, by } => {
            let parent = match parent {
                Some(parent) => parent,
                None => submit_parent(ctx, plans.as_ref(), &id)?,
            };
            let roadmaps = ctx.roadmaps()?;
            let outcome = submit_plan(
                plans.as_ref(),
                &roadmaps,
                &ctx.graphite,
                &ctx.topology,
                &id,
                SubmitRequest {
                    pr: &pr,
                    parent: &parent,
                    submitted_by: by.as_deref(),
                },
            )?;
            if let Some(footer) = outcome.footer {
                println!("{footer}");
            }
        }
        PlanCommand::Land { id, pr } => {
            let roadmaps = ctx.roadmaps()?;
            let outcome = land_plan(plans.as_ref(), &roadmaps, &id, pr.as_deref())?;
            for node in &outcome.nodes_done {
                println!("done\t{node}");
            }
        }
    }
    Ok(exit_codes::OK)
}

/// Parent recorded by `gt` for the plan's branch, else trunk.
fn submit_parent(ctx: &OrchardContext, plans: &dyn PlanStore, id: &str) -> Result<String> {
    let plan = plans.get(id)?;
    let branch = match plan.metadata_str(KEY_BRANCH_NAME) {
        Some(branch) => branch.to_string(),
        None => ctx.git.current_branch_at(&ctx.repo_root)?,
    };
    Ok(ctx
        .graphite
        .parent_of(&branch)?
        .unwrap_or_else(|| ctx.config.trunk_branch.clone()))
}

fn cmd_objective(ctx: &OrchardContext, cmd: ObjectiveCommand) -> Result<i32> {
    let roadmaps = ctx.roadmaps()?;
    match cmd {
        ObjectiveCommand::Show { objective } => {
            let snapshot = roadmaps.load(&objective)?;
            println!("#{} {}", snapshot.objective, snapshot.title);
            for node in &snapshot.roadmap.nodes {
                let link = node.pr.as_deref().or(node.plan.as_deref()).unwrap_or("-");
                println!("{}\t{}\t{link}\t{}", node.id, node.status, node.description);
            }
        }
        ObjectiveCommand::Next { objective, all } => {
            let plans = ctx.plans()?;
            let dispatcher = ctx.dispatcher();
            let unblocked = ObjectiveScheduler::new(&roadmaps, plans.as_ref(), &dispatcher)
                .resolve_unblocked(&objective)?;
            let shown = if all { unblocked.len() } else { 1 };
            for ready in unblocked.iter().take(shown) {
                println!("{}\t{}\t{}", ready.node.id, ready.phase, ready.node.description);
            }
        }
        ObjectiveCommand::Dispatch {
            objective,
            node,
            all,
            dry_run,
            model,
            labels,
        } => {
            parse_record_number(&objective)?;
            let plans = ctx.plans()?;
            let dispatcher = ctx.dispatcher();
            let scheduler = ObjectiveScheduler::new(&roadmaps, plans.as_ref(), &dispatcher);
            let options = DispatchOptions {
                dry_run,
                model: model.unwrap_or_else(|| ctx.config.dispatch.model.clone()),
                labels,
            };
            let report = if all {
                scheduler.dispatch_all_unblocked(&objective, &options)?
            } else {
                scheduler.dispatch_one(&objective, node.as_deref(), &options)?
            };
            print_report(&report);
            if report.is_partial() {
                return Ok(exit_codes::PARTIAL);
            }
        }
    }
    Ok(exit_codes::OK)
}

fn print_report(report: &DispatchReport) {
    for node in &report.dispatched {
        if report.dry_run {
            println!("--- {} ({})\n{}", node.node_id, node.phase, node.instruction);
            continue;
        }
        let plan = node.plan_id.as_deref().unwrap_or("-");
        let run = node.run.as_ref().and_then(|r| r.url.as_deref()).unwrap_or("-");
        println!("{}\t#{plan}\t{run}", node.node_id);
    }
    for failure in &report.failures {
        eprintln!("failed\t{}\t{}", failure.node_id, failure.error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_with_overrides() {
        let cli = Cli::parse_from(["orchard", "init", "--pool-size", "6", "--trunk", "develop"]);
        assert!(matches!(
            cli.command,
            Command::Init { force: false, pool_size: Some(6), trunk: Some(ref t) } if t == "develop"
        ));
    }

    #[test]
    fn parse_slot_assign_force() {
        let cli = Cli::parse_from(["orchard", "slot", "assign", "feature-x", "-f"]);
        assert!(matches!(
            cli.command,
            Command::Slot(SlotCommand::Assign { force: true, parent: None, .. })
        ));
    }

    #[test]
    fn parse_dispatch_all_dry_run() {
        let cli = Cli::parse_from(["orchard", "objective", "dispatch", "12", "--all", "--dry-run"]);
        assert!(matches!(
            cli.command,
            Command::Objective(ObjectiveCommand::Dispatch { all: true, dry_run: true, node: None, .. })
        ));
    }

    #[test]
    fn parse_objective_next_all() {
        let cli = Cli::parse_from(["orchard", "objective", "next", "12", "--all"]);
        assert!(matches!(
            cli.command,
            Command::Objective(ObjectiveCommand::Next { all: true, ref objective }) if objective == "12"
        ));
    }

    #[test]
    fn dispatch_node_conflicts_with_all() {
        let parsed = Cli::try_parse_from(["orchard", "objective", "dispatch", "12", "--all", "--node", "1.1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn domain_errors_map_to_exit_codes() {
        let err = anyhow::Error::from(OrchardError::SlotNotFound("orchard-slot-09".to_string()))
            .context("release slot");
        assert_eq!(report_error(&err), exit_codes::NOT_FOUND);
        assert_eq!(report_error(&anyhow::anyhow!("boom")), exit_codes::INVALID);
    }
}
