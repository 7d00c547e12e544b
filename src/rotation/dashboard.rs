//! Fleet health classification for the rotation dashboard.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::{Device, DeviceId, RotationState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceHealth {
    Healthy,
    Warning,
    Critical,
}

/// Classify one device. A TIMEOUT device with no recorded completion is critical.
pub fn classify(device: &Device, now: DateTime<Utc>, critical_age: Duration) -> DeviceHealth {
    match device.rotation_state {
        RotationState::Ok | RotationState::Queued | RotationState::Pending => DeviceHealth::Healthy,
        RotationState::Timeout => match device.last_rotation_completed_at {
            Some(completed) if now - completed < critical_age => DeviceHealth::Warning,
            _ => DeviceHealth::Critical,
        },
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDashboardEntry {
    pub device_id: DeviceId,
    pub device_key: String,
    pub rotation_state: RotationState,
    pub health: DeviceHealth,
    pub secret_created_at: DateTime<Utc>,
    pub last_rotation_attempt_at: Option<DateTime<Utc>>,
    pub last_rotation_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthTotals {
    pub healthy: u64,
    pub warning: u64,
    pub critical: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStatus {
    pub devices: Vec<DeviceDashboardEntry>,
    pub totals: HealthTotals,
}

impl DashboardStatus {
    pub fn build(devices: &[Device], now: DateTime<Utc>, critical_age: Duration) -> Self {
        let mut totals = HealthTotals::default();
        let entries = devices
            .iter()
            .map(|device| {
                let health = classify(device, now, critical_age);
                match health {
                    DeviceHealth::Healthy => totals.healthy += 1,
                    DeviceHealth::Warning => totals.warning += 1,
                    DeviceHealth::Critical => totals.critical += 1,
                }
                DeviceDashboardEntry {
                    device_id: device.id.clone(),
                    device_key: device.device_key.clone(),
                    rotation_state: device.rotation_state,
                    health,
                    secret_created_at: device.secret_created_at,
                    last_rotation_attempt_at: device.last_rotation_attempt_at,
                    last_rotation_completed_at: device.last_rotation_completed_at,
                }
            })
            .collect();

        Self { devices: entries, totals }
    }
}
