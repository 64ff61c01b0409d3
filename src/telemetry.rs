//! Logging setup for the binaries.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `GRIDRAG_LOG=gridrag=debug`.
pub const LOG_ENV: &str = "GRIDRAG_LOG";

/// Installs a stderr `fmt` subscriber filtered by [`LOG_ENV`], defaulting to `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Same as [`init_tracing`] with a different fallback filter.
pub fn init_tracing_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
