//! Tracing subscriber setup.
//!
//! Log level comes from `RUST_LOG` (default `info`). Logs go to stderr so
//! CLI output on stdout stays clean.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
