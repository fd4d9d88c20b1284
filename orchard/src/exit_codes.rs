//! Stable exit codes for orchard CLI commands.

use crate::error::{ErrorKind, OrchardError};

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed for a reason without a more specific code.
pub const INVALID: i32 = 1;
/// `orchard objective next|dispatch` found no pending unblocked step.
pub const NOTHING_UNBLOCKED: i32 = 2;
/// The slot pool is full and `--force` was not given.
pub const CAPACITY: i32 = 3;
/// Uncommitted changes or an untracked parent branch blocked the command.
pub const PRECONDITION: i32 = 4;
/// A referenced plan, objective, step, or slot does not exist.
pub const NOT_FOUND: i32 = 5;
/// Input or stored data failed validation.
pub const VALIDATION: i32 = 6;
/// A persisted document changed concurrently.
pub const CONFLICT: i32 = 7;
/// Fan-out dispatch completed with some steps failing to trigger.
pub const PARTIAL: i32 = 8;

pub fn for_error(err: &OrchardError) -> i32 {
    if matches!(err, OrchardError::NoUnblockedNodes(_)) {
        return NOTHING_UNBLOCKED;
    }
    match err.kind() {
        ErrorKind::Capacity => CAPACITY,
        ErrorKind::Precondition => PRECONDITION,
        ErrorKind::NotFound => NOT_FOUND,
        ErrorKind::Validation => VALIDATION,
        ErrorKind::Conflict => CONFLICT,
    }
}
