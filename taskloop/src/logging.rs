//! Diagnostic tracing for the CLI.
//!
//! Output goes to stderr so `taskloop run --json` keeps stdout machine-readable.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Without it the filter is `warn`, or `taskloop=info`
/// when `verbose` is set.
///
/// # Example
/// ```bash
/// RUST_LOG=taskloop=debug taskloop run "Write a release checklist"
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,taskloop=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
