//! # Configuration Management
//!
//! Configuration is layered with the `config` crate:
//!
//! 1. Built-in defaults ([`AppConfig::default`])
//! 2. An optional file named by `CREDPLANE_CONFIG` (TOML, YAML or JSON)
//! 3. Environment variables prefixed with `CREDPLANE__`, using `__` as the
//!    section separator, e.g. `CREDPLANE__ROTATION__PENDING_TIMEOUT_SECONDS=1800`
//!
//! The merged result is validated before it is returned.

pub mod settings;

pub use settings::{
    AppConfig, DatabaseConfig, IdentityProviderConfig, NotificationConfig, ObservabilityConfig,
    RotationConfig, SecretCacheConfig, ServerConfig,
};

use crate::errors::Result;

/// Environment variable naming the optional configuration file
pub const CONFIG_FILE_ENV: &str = "CREDPLANE_CONFIG";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CREDPLANE";

impl AppConfig {
    /// Load configuration from the optional config file and the environment.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        tracing::debug!(config = ?config, "Loaded application configuration");

        Ok(config)
    }
}
