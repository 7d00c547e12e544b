//! Completion detection on authenticated device config fetches.
//!
//! A device proves it holds the new secret by authenticating with a token
//! minted after its rotation began. Detection is a side effect of serving
//! config and fails open: errors are logged and never reach the caller.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{Device, DeviceId};
use crate::rotation::engine::{Finalization, RotationEngine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// Device was not PENDING; nothing to check.
    NotPending,
    /// No token, or the token predates the rotation.
    NotProven,
    Completed { chained: Option<DeviceId> },
    /// Detection hit an internal error; device state untouched by this call.
    Failed,
}

/// Whether a token issued at `issued_at` must have used the rotated secret.
pub fn proves_rotation(
    issued_at: DateTime<Utc>,
    attempt_at: DateTime<Utc>,
    tolerance: Duration,
) -> bool {
    issued_at > attempt_at - tolerance
}

#[derive(Debug, Clone)]
pub struct CompletionDetector {
    engine: Arc<RotationEngine>,
    tolerance: Duration,
}

impl CompletionDetector {
    pub fn new(engine: Arc<RotationEngine>) -> Self {
        let tolerance = engine.settings().completion_tolerance;
        Self { engine, tolerance }
    }

    /// Hook for every authenticated config fetch.
    pub async fn on_config_fetch(
        &self,
        device: &Device,
        token_issued_at: Option<DateTime<Utc>>,
    ) -> CompletionOutcome {
        if !device.is_pending() {
            return CompletionOutcome::NotPending;
        }

        let (Some(issued_at), Some(attempt_at)) = (token_issued_at, device.last_rotation_attempt_at)
        else {
            debug!(device_id = %device.id, "No token issue time to compare, rotation unconfirmed");
            return CompletionOutcome::NotProven;
        };

        if !proves_rotation(issued_at, attempt_at, self.tolerance) {
            debug!(
                device_id = %device.id,
                %issued_at,
                %attempt_at,
                "Token predates rotation, device still using previous secret"
            );
            return CompletionOutcome::NotProven;
        }

        match self.engine.finalize_rotation(&device.id).await {
            Ok(Finalization::Completed { chained }) => {
                info!(device_id = %device.id, chained = ?chained, "Rotation completion detected");
                CompletionOutcome::Completed { chained }
            }
            Ok(Finalization::Stale) => CompletionOutcome::NotPending,
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "Completion detection failed");
                CompletionOutcome::Failed
            }
        }
    }
}
