//! Key/value settings used to persist process-wide rotation markers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{CredplaneError, Result};
use crate::storage::DbPool;

/// Settings key for the time the scheduled fleet trigger last fired.
pub const LAST_FLEET_TRIGGER_KEY: &str = "rotation.last_fleet_trigger_at";

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
    async fn put_setting(&self, key: &str, value: &str) -> Result<()>;

    async fn last_fleet_trigger_at(&self) -> Result<Option<DateTime<Utc>>> {
        match self.get_setting(LAST_FLEET_TRIGGER_KEY).await? {
            Some(value) => DateTime::parse_from_rfc3339(&value)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| {
                    CredplaneError::validation_field(
                        format!("Stored fleet trigger time '{}' is not RFC 3339: {}", value, e),
                        LAST_FLEET_TRIGGER_KEY,
                    )
                }),
            None => Ok(None),
        }
    }

    async fn record_fleet_trigger_at(&self, fired_at: DateTime<Utc>) -> Result<()> {
        self.put_setting(LAST_FLEET_TRIGGER_KEY, &fired_at.to_rfc3339()).await
    }
}

#[derive(Debug, Clone)]
pub struct SqlxSettingsRepository {
    pool: DbPool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| CredplaneError::database(err, format!("Failed to read setting '{}'", key)))
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, format!("Failed to write setting '{}'", key)))?;

        Ok(())
    }
}
