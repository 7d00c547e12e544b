//! # Error Handling
//!
//! Error taxonomy for the credential rotation service, built on `thiserror`.
//!
//! Three kinds matter to rotation callers:
//! - [`CredplaneError::ExternalService`]: identity provider or notification transport
//!   failures. Retried on the next cycle, never dropped silently.
//! - [`CredplaneError::NotFound`]: a device or remote client is missing. Surfaced, not retried.
//! - [`CredplaneError::Validation`]: malformed identifiers or configuration values.

/// Custom result type for credplane operations
pub type Result<T> = std::result::Result<T, CredplaneError>;

/// Main error type for the credential rotation service
#[derive(thiserror::Error, Debug)]
pub enum CredplaneError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Identity provider, notification bridge or other remote dependency failed
    #[error("External service error ({service}): {message}")]
    ExternalService { service: String, message: String },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Operation timed out (lock acquisition, bounded waits)
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Internal server errors
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl CredplaneError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create an external service error
    pub fn external<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::ExternalService { service: service.into(), message: message.into() }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    /// Create an internal server error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Wrap a sqlx error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CredplaneError::Config { .. } => 500,
            CredplaneError::Database { .. } => 500,
            CredplaneError::Serialization { .. } => 400,
            CredplaneError::Validation { .. } => 400,
            CredplaneError::ExternalService { .. } => 502,
            CredplaneError::NotFound { .. } => 404,
            CredplaneError::Timeout { .. } => 503,
            CredplaneError::Internal { .. } => 500,
        }
    }

    /// Check if this error should be retried on the next cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CredplaneError::Database { .. }
                | CredplaneError::ExternalService { .. }
                | CredplaneError::Timeout { .. }
        )
    }
}

impl From<sqlx::Error> for CredplaneError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<serde_json::Error> for CredplaneError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for CredplaneError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<reqwest::Error> for CredplaneError {
    fn from(error: reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            format!("request timed out: {}", error)
        } else {
            error.to_string()
        };
        Self::external("http", message)
    }
}

impl From<validator::ValidationErrors> for CredplaneError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}
