//! Deterministic, pure logic shared by orchard commands.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! documents (pool state, plan records, roadmaps) and return decisions that the
//! orchestration layer applies.

pub mod invariants;
pub mod metadata;
pub mod plan;
pub mod pool;
pub mod roadmap;
pub mod selector;
pub mod topology;
pub mod types;
