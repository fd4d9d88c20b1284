//! Diagnostic tracing for orchard commands.
//!
//! Tracing is for debugging the tool itself (`RUST_LOG`, stderr). Plan history
//! that users rely on lives in the plan event log, which is written regardless
//! of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output goes to stderr in compact
/// format so stdout stays machine-readable.
///
/// # Example
/// ```bash
/// RUST_LOG=orchard=debug orchard slot assign feature-x
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
