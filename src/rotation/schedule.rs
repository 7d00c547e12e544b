//! Schedule evaluation for fleet-wide rotation triggers.
//!
//! Pure functions of `(now, last_fired)`; nothing here reads the clock.
//! Expressions are standard five-field cron (`min hour dom month dow`) or the
//! six-field form with a leading seconds column.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use crate::errors::{CredplaneError, Result};

#[derive(Debug, Clone)]
pub struct ScheduleEvaluator {
    expression: String,
    schedule: Schedule,
    grace: Duration,
}

impl ScheduleEvaluator {
    /// Parse a cron expression with a zero grace window.
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {}", trimmed),
            6 => trimmed.to_string(),
            n => {
                return Err(CredplaneError::validation_field(
                    format!("Cron expression '{}' has {} fields, expected 5 or 6", trimmed, n),
                    "rotation.schedule",
                ))
            }
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            CredplaneError::validation_field(
                format!("Invalid cron expression '{}': {}", trimmed, e),
                "rotation.schedule",
            )
        })?;

        Ok(Self { expression: trimmed.to_string(), schedule, grace: Duration::zero() })
    }

    /// Window used when no previous firing is recorded.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First boundary strictly after `instant`.
    pub fn next_fire_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&instant).next()
    }

    /// Whether a fleet-wide trigger is due at `now`.
    ///
    /// With a marker, due once a boundary has passed since it. Without one,
    /// due only while `now` is within the grace window after a boundary, so a
    /// fresh deployment does not fire for a boundary long past.
    pub fn should_fire(&self, now: DateTime<Utc>, last_fired: Option<DateTime<Utc>>) -> bool {
        let since = match last_fired {
            Some(last) => last,
            None => now - self.grace,
        };

        self.next_fire_after(since).is_some_and(|boundary| boundary <= now)
    }
}
