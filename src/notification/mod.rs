//! # Notification Channel
//!
//! Best-effort nudge telling a device that its credential rotation started.
//! Publishing never blocks the caller and is never retried; a device that
//! misses the message discovers the new secret through its own polling.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::domain::{Device, DeviceId};
use crate::errors::{CredplaneError, Result};

/// Event published when a device enters PENDING.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationNotification {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: DeviceId,
    pub device_key: String,
    pub client_id: String,
}

impl RotationNotification {
    pub fn rotation_started(device: &Device, client_id: String, at: DateTime<Utc>) -> Self {
        Self {
            event_type: "device.rotation_started".to_string(),
            timestamp: at,
            device_id: device.id.clone(),
            device_key: device.device_key.clone(),
            client_id,
        }
    }
}

pub trait DeviceNotifier: Send + Sync {
    /// Fire-and-forget publish. Must return without waiting on the transport.
    fn publish(&self, notification: RotationNotification);
}

/// Posts notifications as JSON to a publish bridge.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    publish_url: String,
}

impl HttpNotifier {
    pub fn new(publish_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            CredplaneError::config(format!("Failed to build notification HTTP client: {}", e))
        })?;
        Ok(Self { client, publish_url: publish_url.into() })
    }
}

impl DeviceNotifier for HttpNotifier {
    fn publish(&self, notification: RotationNotification) {
        let client = self.client.clone();
        let url = self.publish_url.clone();

        tokio::spawn(async move {
            let device_id = notification.device_id.clone();
            match client.post(&url).json(&notification).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(device_id = %device_id, "Rotation notification published");
                }
                Ok(response) => {
                    warn!(
                        device_id = %device_id,
                        status = %response.status(),
                        "Rotation notification rejected by publish bridge"
                    );
                }
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "Rotation notification failed");
                }
            }
        });
    }
}

/// Used when no publish bridge is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl DeviceNotifier for NoopNotifier {
    fn publish(&self, notification: RotationNotification) {
        debug!(device_id = %notification.device_id, "No publish bridge configured, skipping notification");
    }
}

/// Build the notifier selected by configuration.
pub fn notifier_from_config(config: &NotificationConfig) -> Result<Box<dyn DeviceNotifier>> {
    match config.publish_url.as_deref() {
        Some(url) if !url.trim().is_empty() => Ok(Box::new(HttpNotifier::new(url, config.timeout())?)),
        _ => Ok(Box::new(NoopNotifier)),
    }
}
