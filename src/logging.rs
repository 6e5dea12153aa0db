//! Tracing setup for embedders and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ProvenaError, Result};

/// Installs the global tracing subscriber with the given filter directive
/// (e.g. `"provena=debug"`). Fails if a subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| ProvenaError::InvalidArgument(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .try_init()
        .map_err(|_| ProvenaError::InvalidArgument("logging already initialized".into()))
}
