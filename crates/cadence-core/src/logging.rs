use tracing_subscriber::EnvFilter;

use crate::{
    config::LoggingConfig,
    error::{CadenceError, Result},
};

/// Install a global `fmt` subscriber for a host process embedding the engine.
///
/// `RUST_LOG` wins over the configured filter. Fails if a global subscriber
/// is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| CadenceError::Logging(e.to_string()))
}
