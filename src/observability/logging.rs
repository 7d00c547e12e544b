//! # Structured Logging
//!
//! Subscriber setup and span macros built on the tracing ecosystem.
//!
//! `RUST_LOG` takes precedence over the configured log level so operators can
//! raise verbosity for one module without touching the config file.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::errors::{CredplaneError, Result};

/// Create a tracing span for a rotation engine operation.
///
/// ```rust,ignore
/// let span = rotation_span!("initiate_rotation", device.id);
/// ```
#[macro_export]
macro_rules! rotation_span {
    ($operation:expr) => {
        tracing::info_span!(
            "rotation",
            operation = %$operation,
            device_id = tracing::field::Empty
        )
    };
    ($operation:expr, $device_id:expr) => {
        tracing::info_span!(
            "rotation",
            operation = %$operation,
            device_id = %$device_id
        )
    };
}

/// Build the env filter from `RUST_LOG`, falling back to the configured level.
pub fn build_env_filter(config: &ObservabilityConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            CredplaneError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        }),
    }
}

/// Install the global subscriber, plain text or JSON depending on config.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = build_env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logging {
        registry.with(fmt::layer().json().with_target(true).with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| CredplaneError::config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        server_address = %config.server.bind_address(),
        identity_provider = %config.identity_provider.base_url,
        realm = %config.identity_provider.realm,
        schedule = %config.rotation.schedule,
        pending_timeout_seconds = config.rotation.pending_timeout_seconds,
        completion_tolerance_seconds = config.rotation.completion_tolerance_seconds,
        notifications_enabled = config.notification.publish_url.is_some(),
        "Credplane configuration"
    );
}
