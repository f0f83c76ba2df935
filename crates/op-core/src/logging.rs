//! Logging bootstrap
//!
//! All crates log through `tracing`; the binary installs a single
//! `tracing-subscriber` formatter here. `RUST_LOG` takes precedence over the
//! configured level.

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

/// Build the filter for the given configured level
pub fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed (tests and embedders
/// may have installed their own).
pub fn init(level: LogLevel) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(true)
        .try_init()
        .is_ok()
}
