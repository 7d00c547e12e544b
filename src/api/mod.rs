//! # Rotation Admin API
//!
//! HTTP surface over the rotation engine: single-device and fleet triggers,
//! fleet status and the health dashboard.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::{build_router, ApiState};
pub use server::start_api_server;
