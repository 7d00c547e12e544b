//! # Observability Infrastructure
//!
//! Structured logging for the rotation service. Every rotation decision is
//! logged with the device id and state so a fleet wave can be reconstructed
//! from logs alone.

pub mod logging;

pub use logging::{init_logging, log_config_info};

use crate::config::ObservabilityConfig;
use crate::errors::Result;

/// Initialize all observability components
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(config)?;

    tracing::info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        "Observability initialized successfully"
    );

    Ok(())
}
