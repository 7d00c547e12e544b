use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::rotation::{CompletionDetector, RotationEngine};

use super::handlers::{
    config_fetch_handler, health_handler, rotation_dashboard_handler, rotation_status_handler,
    trigger_device_rotation_handler, trigger_fleet_rotation_handler,
};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<RotationEngine>,
    pub completion: CompletionDetector,
}

pub fn build_router(engine: Arc<RotationEngine>) -> Router {
    let api_state = ApiState { completion: CompletionDetector::new(engine.clone()), engine };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/devices/{id}/rotation", post(trigger_device_rotation_handler))
        .route("/api/v1/rotation/fleet", post(trigger_fleet_rotation_handler))
        .route("/api/v1/rotation/status", get(rotation_status_handler))
        .route("/api/v1/rotation/dashboard", get(rotation_dashboard_handler))
        .route("/api/v1/config-fetch/{device_key}", post(config_fetch_handler))
        .with_state(api_state)
        .layer(TraceLayer::new_for_http())
}
