//! Tracing subscriber setup for hosts that embed gitsafe.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a `fmt` subscriber filtered at the configured level.
///
/// Falls back to `info` when the level is not a valid filter directive.
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one is left untouched.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .try_init()
        .is_ok()
}
