//! Repository modules for data access
//!
//! Each repository exposes an `async_trait` interface used by the rotation
//! engine and a `Sqlx*` implementation backed by PostgreSQL.

pub mod device;
pub mod settings;

pub use device::{DeviceRepository, SqlxDeviceRepository, StateCounts};
pub use settings::{SettingsRepository, SqlxSettingsRepository, LAST_FLEET_TRIGGER_KEY};
