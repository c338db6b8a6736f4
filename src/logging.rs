//! Optional log output for binaries and tests.
//!
//! The library only emits `tracing` events; nothing is printed until a
//! subscriber is installed.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a fmt subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Fails instead of panicking when a global subscriber already exists.
pub fn try_init(default_filter: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
}
