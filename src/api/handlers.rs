//! Handlers for the rotation admin API.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::DeviceId;
use crate::errors::CredplaneError;
use crate::rotation::{CompletionOutcome, DashboardStatus, RotationStatus, TriggerOutcome};

use super::{error::ApiError, routes::ApiState};

#[derive(Debug, Serialize)]
pub struct DeviceRotationResponse {
    pub result: TriggerOutcome,
}

#[derive(Debug, Serialize)]
pub struct FleetRotationResponse {
    pub queued: u64,
}

pub async fn trigger_device_rotation_handler(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceRotationResponse>, ApiError> {
    let device_id = DeviceId::parse(&device_id).map_err(|e| {
        CredplaneError::validation_field(format!("Invalid device id '{}': {}", device_id, e), "id")
    })?;
    let result = state.engine.trigger_single_device_rotation(&device_id).await?;
    Ok(Json(DeviceRotationResponse { result }))
}

pub async fn trigger_fleet_rotation_handler(
    State(state): State<ApiState>,
) -> Result<Json<FleetRotationResponse>, ApiError> {
    let queued = state.engine.trigger_fleet_rotation().await?;
    Ok(Json(FleetRotationResponse { queued }))
}

pub async fn rotation_status_handler(
    State(state): State<ApiState>,
) -> Result<Json<RotationStatus>, ApiError> {
    Ok(Json(state.engine.get_status().await?))
}

pub async fn rotation_dashboard_handler(
    State(state): State<ApiState>,
) -> Result<Json<DashboardStatus>, ApiError> {
    Ok(Json(state.engine.get_dashboard_status().await?))
}

/// Reported by the device-facing config endpoint after it authenticates a device.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFetchRequest {
    /// `iat` claim of the token the device authenticated with, in Unix seconds.
    #[serde(default)]
    pub token_issued_at: Option<i64>,
}

pub async fn config_fetch_handler(
    State(state): State<ApiState>,
    Path(device_key): Path<String>,
    Json(request): Json<ConfigFetchRequest>,
) -> Result<Json<CompletionOutcome>, ApiError> {
    let issued_at = request
        .token_issued_at
        .map(|iat| {
            DateTime::from_timestamp(iat, 0).ok_or_else(|| {
                CredplaneError::validation_field(
                    format!("Token issue time {} is out of range", iat),
                    "tokenIssuedAt",
                )
            })
        })
        .transpose()?;

    let device = state.engine.device_by_key(&device_key).await?;
    Ok(Json(state.completion.on_config_fetch(&device, issued_at).await))
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
