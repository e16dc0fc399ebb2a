//! Logging init: `tracing` events formatted to stderr.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,range_download=debug";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Returns `false` if a subscriber was already installed, e.g. by a test harness.
pub fn init_logging() -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
