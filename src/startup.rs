//! Wiring of the rotation stack from configuration and a database pool.

use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::identity::KeycloakAdminClient;
use crate::notification::{notifier_from_config, DeviceNotifier};
use crate::rotation::{EngineSettings, RotationEngine, RotationJob, ScheduleEvaluator};
use crate::services::{AesGcmCipher, SecretCache};
use crate::storage::{DbPool, PgAdvisoryLock, SqlxDeviceRepository, SqlxSettingsRepository};

/// Everything the binary runs. The HTTP router builds the completion
/// detector from `engine`.
#[derive(Clone)]
pub struct RotationServices {
    pub engine: Arc<RotationEngine>,
    pub job: RotationJob,
}

pub fn build_services(config: &AppConfig, pool: DbPool) -> Result<RotationServices> {
    let devices = Arc::new(SqlxDeviceRepository::new(pool.clone()));
    let settings = Arc::new(SqlxSettingsRepository::new(pool.clone()));

    let cipher = Arc::new(AesGcmCipher::new(&config.secret_cache)?);
    let identity = Arc::new(KeycloakAdminClient::new(&config.identity_provider)?);
    let notifier: Arc<dyn DeviceNotifier> = Arc::from(notifier_from_config(&config.notification)?);
    let lock = Arc::new(PgAdvisoryLock::new(pool, config.rotation.lock_timeout()));
    let schedule = ScheduleEvaluator::parse(&config.rotation.schedule)?
        .with_grace(config.rotation.schedule_grace());

    let engine = Arc::new(RotationEngine::new(
        devices.clone(),
        identity,
        notifier,
        SecretCache::new(devices, cipher),
        lock,
        schedule,
        EngineSettings::from(&config.rotation),
    ));

    info!(
        schedule = %config.rotation.schedule,
        pending_timeout_seconds = config.rotation.pending_timeout_seconds,
        "Rotation engine ready"
    );

    Ok(RotationServices { job: RotationJob::new(engine.clone(), settings), engine })
}
