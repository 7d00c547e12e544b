//! # Rotation Engine
//!
//! Serialised credential rotation across the device fleet. At most one
//! device is ever PENDING: every state change below runs while holding the
//! [`RotationLock`], and the selection step refuses to start a rotation
//! while another device is still PENDING.
//!
//! A rotation caches the device's current secret (encrypted) before asking
//! the identity provider to regenerate it, so the old secret can be restored
//! if the device never proves possession of the new one.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::config::RotationConfig;
use crate::domain::{Device, DeviceId, RotationState};
use crate::errors::{CredplaneError, Result};
use crate::identity::IdentityProvider;
use crate::notification::{DeviceNotifier, RotationNotification};
use crate::rotation::dashboard::DashboardStatus;
use crate::rotation::schedule::ScheduleEvaluator;
use crate::rotation_span;
use crate::services::SecretCache;
use crate::storage::{DeviceRepository, RotationLock, SettingsRepository, StateCounts};

/// Global timing settings for the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub pending_timeout: Duration,
    pub completion_tolerance: Duration,
    pub critical_age: Duration,
}

impl From<&RotationConfig> for EngineSettings {
    fn from(config: &RotationConfig) -> Self {
        Self {
            pending_timeout: config.pending_timeout(),
            completion_tolerance: config.completion_tolerance(),
            critical_age: config.critical_age(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&RotationConfig::default())
    }
}

/// Outcome of one `process_cycle` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Set when the schedule fired during this cycle; persist as the new marker.
    pub fleet_trigger_fired_at: Option<DateTime<Utc>>,
    pub queued_by_schedule: u64,
    pub timed_out: Vec<DeviceId>,
    pub restore_failures: Vec<DeviceId>,
    pub rotated: Option<DeviceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Queued,
    AlreadyPending,
}

impl TriggerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerOutcome::Queued => "queued",
            TriggerOutcome::AlreadyPending => "already_pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationStatus {
    pub counts: StateCounts,
    pub pending_device_id: Option<DeviceId>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

/// Result of finalising a confirmed rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// The device was no longer PENDING when the lock was taken.
    Stale,
    Completed { chained: Option<DeviceId> },
}

enum Rollback {
    Restored,
    NothingCached,
}

pub struct RotationEngine {
    devices: Arc<dyn DeviceRepository>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn DeviceNotifier>,
    secret_cache: SecretCache,
    lock: Arc<dyn RotationLock>,
    schedule: ScheduleEvaluator,
    settings: EngineSettings,
}

impl RotationEngine {
    pub fn new(
        devices: Arc<dyn DeviceRepository>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn DeviceNotifier>,
        secret_cache: SecretCache,
        lock: Arc<dyn RotationLock>,
        schedule: ScheduleEvaluator,
        settings: EngineSettings,
    ) -> Self {
        Self { devices, identity, notifier, secret_cache, lock, schedule, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// One periodic decision cycle: schedule check, timeout sweep, then at
    /// most one new rotation.
    ///
    /// Per-device sweep errors are absorbed and reported. An error starting
    /// the selected rotation propagates so the caller retries next tick.
    pub async fn process_cycle(
        &self,
        last_scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<CycleReport> {
        let span = rotation_span!("process_cycle");
        async move {
            let _guard = self.lock.acquire().await?;
            let mut report = CycleReport::default();
            self.cycle_locked(last_scheduled_at, None, &mut report).await?;
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// `process_cycle` with the schedule marker read from and written to
    /// `markers` under the rotation lock.
    ///
    /// The marker is recorded as soon as the fleet trigger fires, so a later
    /// failure in the same cycle does not make the next tick fire again.
    pub async fn process_scheduled_cycle(
        &self,
        markers: &dyn SettingsRepository,
    ) -> Result<CycleReport> {
        let span = rotation_span!("process_scheduled_cycle");
        async move {
            let _guard = self.lock.acquire().await?;
            let last_scheduled_at = markers.last_fleet_trigger_at().await?;
            let mut report = CycleReport::default();
            self.cycle_locked(last_scheduled_at, Some(markers), &mut report).await?;
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn cycle_locked(
        &self,
        last_scheduled_at: Option<DateTime<Utc>>,
        markers: Option<&dyn SettingsRepository>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let now = Utc::now();

        if self.schedule.should_fire(now, last_scheduled_at) {
            report.queued_by_schedule = self.devices.queue_all_ok().await?;
            report.fleet_trigger_fired_at = Some(now);
            if let Some(markers) = markers {
                markers.record_fleet_trigger_at(now).await?;
            }
            info!(
                schedule = %self.schedule.expression(),
                queued = report.queued_by_schedule,
                "Scheduled fleet rotation fired"
            );
        }

        self.sweep_timeouts(now, report).await?;
        report.rotated = self.rotate_next_locked().await?;
        Ok(())
    }

    /// Queue every OK device. Returns the number queued.
    #[instrument(skip(self))]
    pub async fn trigger_fleet_rotation(&self) -> Result<u64> {
        let _guard = self.lock.acquire().await?;
        let queued = self.devices.queue_all_ok().await?;
        info!(queued, "Fleet rotation triggered");
        Ok(queued)
    }

    /// Queue one device unless it is already mid-rotation.
    #[instrument(skip(self), fields(device_id = %device_id))]
    pub async fn trigger_single_device_rotation(
        &self,
        device_id: &DeviceId,
    ) -> Result<TriggerOutcome> {
        let _guard = self.lock.acquire().await?;
        let device = self.devices.get_device(device_id).await?;

        let outcome = match device.rotation_state {
            RotationState::Pending => TriggerOutcome::AlreadyPending,
            RotationState::Ok => {
                self.devices.queue_device(device_id).await?;
                TriggerOutcome::Queued
            }
            RotationState::Queued | RotationState::Timeout => TriggerOutcome::Queued,
        };

        info!(state = %device.rotation_state, outcome = outcome.as_str(), "Single device rotation requested");
        Ok(outcome)
    }

    /// Start rotating a QUEUED or TIMEOUT device.
    pub async fn initiate_rotation(&self, device_id: &DeviceId) -> Result<()> {
        let _guard = self.lock.acquire().await?;
        let device = self.devices.get_device(device_id).await?;

        if !matches!(device.rotation_state, RotationState::Queued | RotationState::Timeout) {
            return Err(CredplaneError::validation_field(
                format!("Device '{}' is {} and cannot start a rotation", device.id, device.rotation_state),
                "rotation_state",
            ));
        }
        if self.devices.count_by_state().await?.pending > 0 {
            return Err(CredplaneError::validation(
                "Another device is already PENDING; rotations are serialised",
            ));
        }

        self.initiate_rotation_locked(&device).await
    }

    /// Chain to the next waiting device. Returns whether a rotation started.
    pub async fn rotate_next_queued_device(&self) -> Result<bool> {
        let _guard = self.lock.acquire().await?;
        Ok(self.rotate_next_locked().await?.is_some())
    }

    pub async fn get_status(&self) -> Result<RotationStatus> {
        let counts = self.devices.count_by_state().await?;
        let pending_device_id = self
            .devices
            .list_by_state(RotationState::Pending)
            .await?
            .into_iter()
            .map(|d| d.id)
            .min();
        let last_completed_at = self.devices.latest_completion().await?;

        Ok(RotationStatus {
            counts,
            pending_device_id,
            last_completed_at,
            next_scheduled_at: self.schedule.next_fire_after(Utc::now()),
        })
    }

    pub async fn get_dashboard_status(&self) -> Result<DashboardStatus> {
        let devices = self.devices.list_devices().await?;
        Ok(DashboardStatus::build(&devices, Utc::now(), self.settings.critical_age))
    }

    /// Resolve a device by the key it authenticates with.
    pub async fn device_by_key(&self, device_key: &str) -> Result<Device> {
        self.devices
            .find_by_key(device_key)
            .await?
            .ok_or_else(|| CredplaneError::not_found("device", device_key))
    }

    /// Make sure the device's identity provider client exists, creating it if needed.
    #[instrument(skip(self, device), fields(device_id = %device.id))]
    pub async fn ensure_device_client(&self, device: &Device) -> Result<bool> {
        let client_id = device.client_id()?;
        if self.identity.client_exists(&client_id).await? {
            return Ok(false);
        }
        self.identity.create_client(&client_id).await?;
        info!(client_id = %client_id, "Provisioned identity provider client");
        Ok(true)
    }

    /// Mark a PENDING device complete and chain the next rotation, under one
    /// lock acquisition. The chain step runs at most once; its failure is
    /// logged and does not undo the completion.
    pub(crate) async fn finalize_rotation(&self, device_id: &DeviceId) -> Result<Finalization> {
        let span = rotation_span!("finalize_rotation", device_id);
        async move {
            let _guard = self.lock.acquire().await?;
            let completed_at = Utc::now();

            if !self.devices.mark_completed(device_id, completed_at).await? {
                debug!("Device no longer PENDING, nothing to finalize");
                return Ok(Finalization::Stale);
            }
            info!(%completed_at, "Rotation confirmed by device");

            let chained = match self.rotate_next_locked().await {
                Ok(next) => next,
                Err(e) => {
                    warn!(error = %e, "Chained rotation failed, scheduler will retry");
                    None
                }
            };

            Ok(Finalization::Completed { chained })
        }
        .instrument(span)
        .await
    }

    async fn sweep_timeouts(&self, now: DateTime<Utc>, report: &mut CycleReport) -> Result<()> {
        for device in self.devices.list_by_state(RotationState::Pending).await? {
            let overdue = device
                .last_rotation_attempt_at
                .is_none_or(|attempt| now - attempt > self.settings.pending_timeout);
            if !overdue {
                continue;
            }

            match self.roll_back(&device).await {
                Ok(Rollback::Restored) => {
                    info!(device_id = %device.id, "Rotation timed out, previous secret restored");
                    report.timed_out.push(device.id);
                }
                Ok(Rollback::NothingCached) => {
                    warn!(device_id = %device.id, "Rotation timed out with no cached secret to restore");
                    report.timed_out.push(device.id);
                }
                Err(e) => {
                    error!(
                        device_id = %device.id,
                        error = %e,
                        "Failed to restore secret for timed out rotation, leaving device PENDING"
                    );
                    report.restore_failures.push(device.id);
                }
            }
        }
        Ok(())
    }

    async fn roll_back(&self, device: &Device) -> Result<Rollback> {
        let Some(previous) = self.secret_cache.get(device)? else {
            self.devices.mark_timed_out(&device.id).await?;
            return Ok(Rollback::NothingCached);
        };

        let client_id = device.client_id()?;
        self.identity.set_secret(&client_id, &previous).await?;
        self.devices.mark_timed_out(&device.id).await?;
        Ok(Rollback::Restored)
    }

    /// Next candidate: stalest QUEUED secret, else longest-stuck TIMEOUT.
    async fn select_candidate(&self) -> Result<Option<Device>> {
        let mut queued = self.devices.list_by_state(RotationState::Queued).await?;
        queued.sort_by(|a, b| {
            a.secret_created_at.cmp(&b.secret_created_at).then_with(|| a.id.cmp(&b.id))
        });
        if let Some(device) = queued.into_iter().next() {
            return Ok(Some(device));
        }

        let mut timed_out = self.devices.list_by_state(RotationState::Timeout).await?;
        timed_out.sort_by(|a, b| {
            a.last_rotation_attempt_at
                .cmp(&b.last_rotation_attempt_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(timed_out.into_iter().next())
    }

    async fn rotate_next_locked(&self) -> Result<Option<DeviceId>> {
        let pending = self.devices.count_by_state().await?.pending;
        if pending > 0 {
            debug!(pending, "A rotation is already in progress");
            return Ok(None);
        }

        let Some(candidate) = self.select_candidate().await? else {
            return Ok(None);
        };

        self.initiate_rotation_locked(&candidate).await?;
        Ok(Some(candidate.id))
    }

    async fn initiate_rotation_locked(&self, device: &Device) -> Result<()> {
        let span = rotation_span!("initiate_rotation", device.id);
        async move {
            let client_id = device.client_id()?;

            let previous = self.identity.get_secret(&client_id).await?;
            self.secret_cache.cache(&device.id, &previous).await?;

            if let Err(e) = self.identity.regenerate_secret(&client_id).await {
                if let Err(clear_err) = self.secret_cache.clear(&device.id).await {
                    error!(error = %clear_err, "Failed to clear cached secret after regenerate failure");
                }
                return Err(e);
            }

            let attempted_at = Utc::now();
            if let Err(e) = self.devices.mark_pending(&device.id, attempted_at).await {
                error!(error = %e, "Failed to record PENDING after regenerate, restoring previous secret");
                match self.identity.set_secret(&client_id, &previous).await {
                    Ok(()) => {
                        if let Err(clear_err) = self.secret_cache.clear(&device.id).await {
                            error!(error = %clear_err, "Failed to clear cached secret after restore");
                        }
                    }
                    Err(restore_err) => {
                        error!(error = %restore_err, "Restore failed, keeping cached secret");
                    }
                }
                return Err(e);
            }

            info!(
                client_id = %client_id,
                previous_state = %device.rotation_state,
                "Rotation initiated, device PENDING"
            );
            self.notifier.publish(RotationNotification::rotation_started(device, client_id, attempted_at));
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for RotationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationEngine")
            .field("schedule", &self.schedule.expression())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
