//! Logging setup
//!
//! `RUST_LOG` wins over the configured level when it is set.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Build the filter from `RUST_LOG`, falling back to `default_level`
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global fmt subscriber
///
/// Returns false if a subscriber was already installed (for example by an
/// earlier call in the same test binary).
pub fn init(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
