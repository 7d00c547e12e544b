//! Device records and the rotation state machine.
//!
//! A [`Device`] is the only entity the rotation engine mutates. Its
//! [`RotationState`] moves through:
//!
//! ```text
//!   OK ──trigger──▶ QUEUED ──select+regenerate──▶ PENDING ──completion──▶ OK
//!                                                   │  ▲
//!                                          timeout  ▼  │ retry
//!                                                 TIMEOUT
//! ```

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::DeviceId;
use crate::errors::{CredplaneError, Result};

/// Allowed characters for device keys and model codes. These end up in the
/// identity provider client id, so they must be URL-path safe.
static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$")
        .expect("IDENTIFIER_PATTERN should be a valid regex pattern")
});

/// Rotation state of a single device credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationState {
    /// Credential valid, no action pending
    Ok,
    /// Awaiting its turn in the current rotation wave
    Queued,
    /// Rotation initiated; device has not yet proven possession of the new secret
    Pending,
    /// Confirmation window elapsed without proof
    Timeout,
}

impl RotationState {
    pub const ALL: [RotationState; 4] =
        [RotationState::Ok, RotationState::Queued, RotationState::Pending, RotationState::Timeout];

    pub fn as_str(&self) -> &'static str {
        match self {
            RotationState::Ok => "OK",
            RotationState::Queued => "QUEUED",
            RotationState::Pending => "PENDING",
            RotationState::Timeout => "TIMEOUT",
        }
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: RotationState) -> bool {
        matches!(
            (self, next),
            (RotationState::Ok, RotationState::Queued)
                | (RotationState::Queued, RotationState::Pending)
                | (RotationState::Timeout, RotationState::Pending)
                | (RotationState::Pending, RotationState::Ok)
                | (RotationState::Pending, RotationState::Timeout)
        )
    }
}

impl Display for RotationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RotationState {
    type Err = RotationStateParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "OK" => Ok(RotationState::Ok),
            "QUEUED" => Ok(RotationState::Queued),
            "PENDING" => Ok(RotationState::Pending),
            "TIMEOUT" => Ok(RotationState::Timeout),
            other => Err(RotationStateParseError(other.to_string())),
        }
    }
}

/// Error returned when rotation state parsing fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid rotation state: {0}")]
pub struct RotationStateParseError(pub String);

/// Persisted device record as seen by the rotation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub device_key: String,
    pub model_code: String,
    pub rotation_state: RotationState,
    pub secret_created_at: DateTime<Utc>,
    pub last_rotation_attempt_at: Option<DateTime<Utc>>,
    pub last_rotation_completed_at: Option<DateTime<Utc>>,
    /// AEAD ciphertext of the pre-rotation secret; never serialized outward
    #[serde(skip)]
    pub cached_secret: Option<Vec<u8>>,
}

impl Device {
    /// Identity provider client id for this device.
    pub fn client_id(&self) -> Result<String> {
        client_id_for(&self.model_code, &self.device_key)
    }

    pub fn is_pending(&self) -> bool {
        self.rotation_state == RotationState::Pending
    }
}

/// Data needed to register a device record.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub id: DeviceId,
    pub device_key: String,
    pub model_code: String,
    pub secret_created_at: DateTime<Utc>,
}

impl NewDevice {
    pub fn new(device_key: impl Into<String>, model_code: impl Into<String>) -> Result<Self> {
        let device_key = device_key.into();
        let model_code = model_code.into();
        validate_identifier(&device_key, "device_key")?;
        validate_identifier(&model_code, "model_code")?;

        Ok(Self { id: DeviceId::new(), device_key, model_code, secret_created_at: Utc::now() })
    }
}

/// Derive the identity provider client id from model code and device key.
///
/// Both parts are validated and lowercased: `ESP32-C3` + `A1B2` becomes `esp32-c3-a1b2`.
pub fn client_id_for(model_code: &str, device_key: &str) -> Result<String> {
    validate_identifier(model_code, "model_code")?;
    validate_identifier(device_key, "device_key")?;
    Ok(format!("{}-{}", model_code.to_ascii_lowercase(), device_key.to_ascii_lowercase()))
}

fn validate_identifier(value: &str, field: &str) -> Result<()> {
    if IDENTIFIER_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(CredplaneError::validation_field(
            format!(
                "'{}' must be 1-64 characters of letters, digits, '-' or '_' starting with an alphanumeric",
                value
            ),
            field,
        ))
    }
}
