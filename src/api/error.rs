use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::errors::CredplaneError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    BadGateway(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let (error_kind, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::BadGateway(msg) => ("external_service_error", msg),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
        };

        (status, Json(ErrorBody { error: error_kind, message })).into_response()
    }
}

impl From<CredplaneError> for ApiError {
    fn from(err: CredplaneError) -> Self {
        match err {
            CredplaneError::Validation { .. } | CredplaneError::Serialization { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            CredplaneError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            CredplaneError::ExternalService { .. } => ApiError::BadGateway(err.to_string()),
            CredplaneError::Timeout { .. } => ApiError::ServiceUnavailable(err.to_string()),
            CredplaneError::Database { ref context, .. } => {
                tracing::error!(error = %err, "Database error while serving request");
                ApiError::Internal(context.clone())
            }
            CredplaneError::Config { .. } | CredplaneError::Internal { .. } => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}
