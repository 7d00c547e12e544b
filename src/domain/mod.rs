//! Domain layer
//!
//! Pure domain entities for the rotation engine: device identifiers, the
//! device record and the rotation state machine. Nothing here talks to the
//! database or the network.

pub mod device;
pub mod id;

pub use device::{client_id_for, Device, NewDevice, RotationState, RotationStateParseError};
pub use id::DeviceId;
