//! Console logging for the `skycoadd` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left to the caller.
//! `RUST_LOG` overrides the base level when set.
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::coadd_errors::CoaddError;

/// Install a `fmt` subscriber writing to stderr, filtered at `base_level` (e.g. `"info"`,
/// `"skycoadd=debug"`).
///
/// Return
/// ----------
/// * `Err(CoaddError::InvalidCoaddParameter)` if the filter does not parse or a global
///   subscriber is already installed.
pub fn setup_logging(base_level: &str) -> Result<(), CoaddError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(base_level))
        .map_err(|e| CoaddError::InvalidCoaddParameter(format!("invalid log filter: {e}")))?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .map_err(|e| CoaddError::InvalidCoaddParameter(format!("logger initialization failed: {e}")))
}
