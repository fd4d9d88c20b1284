//! I/O adapters for orchard commands.
//!
//! Each external collaborator sits behind a trait so orchestration can be
//! exercised with in-memory fakes.

pub mod config;
pub mod dispatch;
pub mod git;
pub mod github;
pub mod graphite;
pub mod init;
pub mod instruction;
pub mod pool_store;
pub mod process;
pub mod roadmap_store;
