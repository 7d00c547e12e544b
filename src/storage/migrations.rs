//! # Database Migration Management
//!
//! SQL migrations under `migrations/` are embedded into the binary with
//! `sqlx::migrate!` and applied on startup when `auto_migrate` is enabled.

use crate::errors::{CredplaneError, Result};
use crate::storage::DbPool;
use sqlx::migrate::Migrator;
use tracing::{error, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply all pending migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!(available = MIGRATOR.iter().count(), "Applying database migrations");

    MIGRATOR.run(pool).await.map_err(|e| {
        error!(error = %e, "Database migration failed");
        CredplaneError::Database {
            source: sqlx::Error::Migrate(Box::new(e)),
            context: "Failed to apply database migrations".to_string(),
        }
    })?;

    info!("Database migrations applied");
    Ok(())
}
