//! Device repository for rotation state persistence
//!
//! State-changing statements are guarded by the expected prior state in their
//! `WHERE` clause, so a caller working from a stale read cannot regress a
//! record. Timestamps that must only move forward are written with `GREATEST`.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::domain::{Device, DeviceId, NewDevice, RotationState};
use crate::errors::{CredplaneError, Result};
use crate::storage::DbPool;

const DEVICE_COLUMNS: &str = "id, device_key, model_code, rotation_state, secret_created_at, \
     last_rotation_attempt_at, last_rotation_completed_at, cached_secret";

#[derive(Debug, Clone, FromRow)]
struct DeviceRow {
    pub id: String,
    pub device_key: String,
    pub model_code: String,
    pub rotation_state: String,
    pub secret_created_at: DateTime<Utc>,
    pub last_rotation_attempt_at: Option<DateTime<Utc>>,
    pub last_rotation_completed_at: Option<DateTime<Utc>>,
    pub cached_secret: Option<Vec<u8>>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = CredplaneError;

    fn try_from(row: DeviceRow) -> Result<Self> {
        let rotation_state = RotationState::from_str(&row.rotation_state).map_err(|_| {
            CredplaneError::validation(format!(
                "Unknown rotation state '{}' for device {}",
                row.rotation_state, row.id
            ))
        })?;

        Ok(Device {
            id: DeviceId::from_string(row.id),
            device_key: row.device_key,
            model_code: row.model_code,
            rotation_state,
            secret_created_at: row.secret_created_at,
            last_rotation_attempt_at: row.last_rotation_attempt_at,
            last_rotation_completed_at: row.last_rotation_completed_at,
            cached_secret: row.cached_secret,
        })
    }
}

/// Number of devices in each rotation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCounts {
    pub ok: u64,
    pub queued: u64,
    pub pending: u64,
    pub timeout: u64,
}

impl StateCounts {
    pub fn add(&mut self, state: RotationState, count: u64) {
        match state {
            RotationState::Ok => self.ok += count,
            RotationState::Queued => self.queued += count,
            RotationState::Pending => self.pending += count,
            RotationState::Timeout => self.timeout += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.ok + self.queued + self.pending + self.timeout
    }
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn create_device(&self, device: NewDevice) -> Result<Device>;
    async fn get_device(&self, id: &DeviceId) -> Result<Device>;
    async fn find_by_key(&self, device_key: &str) -> Result<Option<Device>>;
    async fn list_devices(&self) -> Result<Vec<Device>>;
    async fn list_by_state(&self, state: RotationState) -> Result<Vec<Device>>;
    async fn count_by_state(&self) -> Result<StateCounts>;
    async fn latest_completion(&self) -> Result<Option<DateTime<Utc>>>;

    /// `OK -> QUEUED` for every OK device. Returns the number transitioned.
    async fn queue_all_ok(&self) -> Result<u64>;
    /// `OK -> QUEUED` for one device. Returns false if it was not OK.
    async fn queue_device(&self, id: &DeviceId) -> Result<bool>;
    /// `QUEUED|TIMEOUT -> PENDING`, recording the attempt time.
    async fn mark_pending(&self, id: &DeviceId, attempted_at: DateTime<Utc>) -> Result<()>;
    /// `PENDING -> TIMEOUT` and drop the cached secret. Returns false if it was not PENDING.
    async fn mark_timed_out(&self, id: &DeviceId) -> Result<bool>;
    /// `PENDING -> OK`, record completion, advance `secret_created_at` and drop the cached secret.
    async fn mark_completed(&self, id: &DeviceId, completed_at: DateTime<Utc>) -> Result<bool>;

    async fn store_cached_secret(&self, id: &DeviceId, ciphertext: &[u8]) -> Result<()>;
    async fn clear_cached_secret(&self, id: &DeviceId) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqlxDeviceRepository {
    pool: DbPool,
}

impl SqlxDeviceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn fetch_many(&self, sql: &str, context: &str) -> Result<Vec<Device>> {
        let rows: Vec<DeviceRow> = sqlx::query_as(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| CredplaneError::database(err, context))?;

        rows.into_iter().map(Device::try_from).collect()
    }
}

#[async_trait]
impl DeviceRepository for SqlxDeviceRepository {
    async fn create_device(&self, device: NewDevice) -> Result<Device> {
        sqlx::query(
            "INSERT INTO devices (id, device_key, model_code, rotation_state, secret_created_at, created_at, updated_at) \
             VALUES ($1, $2, $3, 'OK', $4, NOW(), NOW())",
        )
        .bind(&device.id)
        .bind(&device.device_key)
        .bind(&device.model_code)
        .bind(device.secret_created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to insert device"))?;

        self.get_device(&device.id).await
    }

    async fn get_device(&self, id: &DeviceId) -> Result<Device> {
        let row: DeviceRow =
            sqlx::query_as(&format!("SELECT {} FROM devices WHERE id = $1", DEVICE_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| CredplaneError::database(err, "Failed to fetch device"))?
                .ok_or_else(|| CredplaneError::not_found("device", id.as_str()))?;

        Device::try_from(row)
    }

    async fn find_by_key(&self, device_key: &str) -> Result<Option<Device>> {
        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM devices WHERE device_key = $1",
            DEVICE_COLUMNS
        ))
        .bind(device_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to fetch device by key"))?;

        row.map(Device::try_from).transpose()
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.fetch_many(
            &format!("SELECT {} FROM devices ORDER BY device_key", DEVICE_COLUMNS),
            "Failed to list devices",
        )
        .await
    }

    async fn list_by_state(&self, state: RotationState) -> Result<Vec<Device>> {
        let rows: Vec<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM devices WHERE rotation_state = $1 ORDER BY id",
            DEVICE_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to list devices by state"))?;

        rows.into_iter().map(Device::try_from).collect()
    }

    async fn count_by_state(&self) -> Result<StateCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT rotation_state, COUNT(*) FROM devices GROUP BY rotation_state",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to count devices by state"))?;

        let mut counts = StateCounts::default();
        for (state, count) in rows {
            let state = RotationState::from_str(&state).map_err(|_| {
                CredplaneError::validation(format!("Unknown rotation state '{}'", state))
            })?;
            counts.add(state, count.max(0) as u64);
        }
        Ok(counts)
    }

    async fn latest_completion(&self) -> Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar("SELECT MAX(last_rotation_completed_at) FROM devices")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| CredplaneError::database(err, "Failed to fetch latest completion"))
    }

    async fn queue_all_ok(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE devices SET rotation_state = 'QUEUED', updated_at = NOW() \
             WHERE rotation_state = 'OK'",
        )
        .execute(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to queue fleet rotation"))?;

        Ok(result.rows_affected())
    }

    async fn queue_device(&self, id: &DeviceId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE devices SET rotation_state = 'QUEUED', updated_at = NOW() \
             WHERE id = $1 AND rotation_state = 'OK'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to queue device rotation"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_pending(&self, id: &DeviceId, attempted_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices SET rotation_state = 'PENDING', \
                 last_rotation_attempt_at = GREATEST(COALESCE(last_rotation_attempt_at, $2), $2), \
                 updated_at = NOW() \
             WHERE id = $1 AND rotation_state IN ('QUEUED', 'TIMEOUT')",
        )
        .bind(id)
        .bind(attempted_at)
        .execute(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to mark device pending"))?;

        if result.rows_affected() == 0 {
            return Err(CredplaneError::validation(format!(
                "Device '{}' is not QUEUED or TIMEOUT and cannot start a rotation",
                id
            )));
        }
        Ok(())
    }

    async fn mark_timed_out(&self, id: &DeviceId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE devices SET rotation_state = 'TIMEOUT', cached_secret = NULL, updated_at = NOW() \
             WHERE id = $1 AND rotation_state = 'PENDING'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to mark device timed out"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(&self, id: &DeviceId, completed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE devices SET rotation_state = 'OK', \
                 last_rotation_completed_at = $2, \
                 secret_created_at = GREATEST(secret_created_at, $2), \
                 cached_secret = NULL, \
                 updated_at = NOW() \
             WHERE id = $1 AND rotation_state = 'PENDING'",
        )
        .bind(id)
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to mark rotation completed"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn store_cached_secret(&self, id: &DeviceId, ciphertext: &[u8]) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices SET cached_secret = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(ciphertext)
        .execute(&self.pool)
        .await
        .map_err(|err| CredplaneError::database(err, "Failed to store cached secret"))?;

        if result.rows_affected() == 0 {
            return Err(CredplaneError::not_found("device", id.as_str()));
        }
        Ok(())
    }

    async fn clear_cached_secret(&self, id: &DeviceId) -> Result<()> {
        sqlx::query("UPDATE devices SET cached_secret = NULL, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| CredplaneError::database(err, "Failed to clear cached secret"))?;
        Ok(())
    }
}
