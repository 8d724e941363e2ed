//! Logging setup and configuration

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{ClientError, Result};

/// Install a tracing subscriber for the embedding application.
///
/// Honors `RUST_LOG` when set, falling back to `default_level`. Returns an
/// error if a subscriber is already installed.
pub fn setup_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| ClientError::Config(format!("invalid log filter: {e}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| ClientError::Config(format!("subscriber already installed: {e}")))?;

    Ok(())
}
