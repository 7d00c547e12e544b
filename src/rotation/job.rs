//! Periodic driver for the rotation cycle.
//!
//! The schedule marker lives in the settings table, so a restart or a
//! second instance sees the same "last fired" time as this one.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::errors::Result;
use crate::rotation::engine::{CycleReport, RotationEngine};
use crate::storage::SettingsRepository;

#[derive(Clone)]
pub struct RotationJob {
    engine: Arc<RotationEngine>,
    settings: Arc<dyn SettingsRepository>,
}

impl RotationJob {
    pub fn new(engine: Arc<RotationEngine>, settings: Arc<dyn SettingsRepository>) -> Self {
        Self { engine, settings }
    }

    /// Run one cycle. The engine persists the schedule marker when the fleet
    /// trigger fires, even if starting a rotation later in the cycle fails.
    pub async fn run_once(&self) -> Result<CycleReport> {
        let report = self.engine.process_scheduled_cycle(self.settings.as_ref()).await?;

        if report.rotated.is_some()
            || !report.timed_out.is_empty()
            || !report.restore_failures.is_empty()
            || report.fleet_trigger_fired_at.is_some()
        {
            info!(
                queued_by_schedule = report.queued_by_schedule,
                timed_out = report.timed_out.len(),
                restore_failures = report.restore_failures.len(),
                rotated = ?report.rotated,
                "Rotation cycle completed"
            );
        }

        Ok(report)
    }

    /// Drive `run_once` on a fixed cadence. Errors are logged and retried next tick.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!(error = %e, retryable = e.is_retryable(), "Rotation cycle failed");
                }
            }
        })
    }
}
