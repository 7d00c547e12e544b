//! # Rotation Lock
//!
//! Every mutation of rotation state happens while holding a single lock so
//! that the check for an existing PENDING device and the start of the next
//! rotation cannot interleave across callers, tasks or processes.
//!
//! [`PgAdvisoryLock`] serialises across every process sharing the database.
//! [`LocalRotationLock`] serialises within one process and is used when no
//! database is involved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::{CredplaneError, Result};
use crate::storage::DbPool;

/// Advisory lock key shared by all credplane processes ("credplan").
pub const ROTATION_LOCK_KEY: i64 = 0x6372_6564_706c_616e;

const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Proof that the rotation lock is held. Released on drop.
pub struct RotationLockGuard {
    _held: Box<dyn Send>,
}

impl RotationLockGuard {
    fn new<T: Send + 'static>(held: T) -> Self {
        Self { _held: Box::new(held) }
    }
}

impl std::fmt::Debug for RotationLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationLockGuard").finish_non_exhaustive()
    }
}

/// Mutual exclusion around rotation state changes. Not reentrant.
#[async_trait]
pub trait RotationLock: Send + Sync {
    async fn acquire(&self) -> Result<RotationLockGuard>;
}

/// Transaction-scoped `pg_advisory_xact_lock`.
///
/// The guard owns the transaction; dropping it rolls back and Postgres
/// releases the lock with it.
#[derive(Debug, Clone)]
pub struct PgAdvisoryLock {
    pool: DbPool,
    timeout: Duration,
}

impl PgAdvisoryLock {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl RotationLock for PgAdvisoryLock {
    async fn acquire(&self) -> Result<RotationLockGuard> {
        let mut tx: Transaction<'static, Postgres> = self
            .pool
            .begin()
            .await
            .map_err(|err| CredplaneError::database(err, "Failed to begin rotation lock transaction"))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|err| CredplaneError::database(err, "Failed to set rotation lock timeout"))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ROTATION_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                let lock_timed_out = err
                    .as_database_error()
                    .and_then(|db| db.code())
                    .is_some_and(|code| code == LOCK_NOT_AVAILABLE);
                if lock_timed_out {
                    CredplaneError::timeout("rotation_lock", self.timeout.as_millis() as u64)
                } else {
                    CredplaneError::database(err, "Failed to acquire rotation advisory lock")
                }
            })?;

        tracing::trace!(key = ROTATION_LOCK_KEY, "Rotation advisory lock acquired");
        Ok(RotationLockGuard::new(tx))
    }
}

/// In-process rotation lock.
#[derive(Debug, Clone)]
pub struct LocalRotationLock {
    inner: Arc<Mutex<()>>,
    timeout: Duration,
}

impl LocalRotationLock {
    pub fn new(timeout: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(())), timeout }
    }
}

impl Default for LocalRotationLock {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl RotationLock for LocalRotationLock {
    async fn acquire(&self) -> Result<RotationLockGuard> {
        let guard: OwnedMutexGuard<()> =
            tokio::time::timeout(self.timeout, self.inner.clone().lock_owned())
                .await
                .map_err(|_| {
                    CredplaneError::timeout("rotation_lock", self.timeout.as_millis() as u64)
                })?;
        Ok(RotationLockGuard::new(guard))
    }
}
