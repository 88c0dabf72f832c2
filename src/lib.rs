//! Adaptive Alerting detector build -- builds, trains, disables and deletes
//! anomaly-detection detectors for the metrics listed in JSON config files.
//!
//! Thresholds are fitted from a week of datasource history and pushed to the
//! model service, which owns the detectors and their metric mappings.

pub mod commands;
pub mod config;
pub mod datasources;
pub mod detectors;
pub mod metrics;
pub mod modelservice;

use std::io::IsTerminal;

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(logging: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal());
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
