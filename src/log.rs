//! Module that contains the logging helpers used across the crate.
//!
//! Messages are usually formatted with [`color_print::cformat`] at the call site and emitted as
//! `tracing` events, so `RUST_LOG` can tune verbosity at runtime.

use tracing_subscriber::EnvFilter;

/// Function that installs the global subscriber. `RUST_LOG` takes precedence over `default_filter`.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

pub fn debug(message: &str) {
    tracing::debug!("{message}");
}

pub fn info(message: &str) {
    tracing::info!("{message}");
}

pub fn warn(message: &str) {
    tracing::warn!("{message}");
}

pub fn error(message: &str) {
    tracing::error!("{message}");
}
