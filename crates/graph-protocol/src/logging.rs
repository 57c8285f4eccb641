//! Tracing subscriber setup

use crate::config::{LogFormat, LoggingConfig};
use graph_core::{GraphError, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level. Fails if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| GraphError::Config(format!("logging.level: {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true).with_thread_ids(false)).try_init(),
    };
    installed.map_err(|e| GraphError::Config(e.to_string()))
}
