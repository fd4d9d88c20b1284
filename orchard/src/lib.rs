//! Workspace and plan orchestration for stacked, agent-driven development.
//!
//! Orchard keeps a fixed pool of reusable git worktrees ("slots"), tracks units
//! of work as plans stored on the code host, and schedules the steps of an
//! objective's dependency roadmap onto remote runners. The architecture keeps
//! a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (slot policy, roadmap graph,
//!   metadata blocks, lifecycle rules). No I/O.
//! - **[`io`]**: Side-effecting adapters (`git`, `gh`, `gt`, filesystem,
//!   configuration), each behind a trait so orchestration can run against fakes.
//!
//! Orchestration modules ([`slots`], [`plans`], [`objective`], [`work`]) combine
//! the two to implement CLI commands; [`context`] wires the real adapters.

pub mod context;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod objective;
pub mod plans;
pub mod slots;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod work;
