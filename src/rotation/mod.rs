//! # Credential Rotation
//!
//! Schedule evaluation, the rotation engine, completion detection, fleet
//! health classification and the periodic job driving it all.

pub mod completion;
pub mod dashboard;
pub mod engine;
pub mod job;
pub mod schedule;

#[cfg(test)]
mod scenarios;

pub use completion::{proves_rotation, CompletionDetector, CompletionOutcome};
pub use dashboard::{classify, DashboardStatus, DeviceDashboardEntry, DeviceHealth, HealthTotals};
pub use engine::{
    CycleReport, EngineSettings, Finalization, RotationEngine, RotationStatus, TriggerOutcome,
};
pub use job::RotationJob;
pub use schedule::ScheduleEvaluator;
