//! # Storage and Persistence
//!
//! Database connectivity, embedded migrations, repositories and the
//! rotation lock for device credential state.

pub mod lock;
pub mod migrations;
pub mod pool;
pub mod repositories;

#[cfg(all(test, feature = "postgres_tests"))]
pub mod test_helpers;

pub use crate::config::DatabaseConfig;

pub use lock::{LocalRotationLock, PgAdvisoryLock, RotationLock, RotationLockGuard};
pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool};
pub use repositories::{
    DeviceRepository, SettingsRepository, SqlxDeviceRepository, SqlxSettingsRepository,
    StateCounts,
};

use crate::errors::{CredplaneError, Result};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| CredplaneError::database(e, "Database connectivity check failed"))?;

    Ok(())
}
