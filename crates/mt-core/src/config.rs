//! Tunable thresholds for the state classifier.
//!
//! A [`ThresholdConfig`] is an immutable snapshot. Reloading builds a new
//! instance, validates it, and swaps it in whole; a rejected config leaves the
//! previous one in place.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TrackingState;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A threshold has a nonsensical value, alone or relative to another.
    #[error("inconsistent threshold config: {field} {reason}")]
    Inconsistent { field: &'static str, reason: String },
}

/// Recommended GPS polling interval per tracking state, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingIntervals {
    pub indoor_ms: i64,
    pub outdoor_ms: i64,
    pub active_ms: i64,
    pub driving_ms: i64,
    pub deep_stationary_ms: i64,
}

impl Default for PollingIntervals {
    fn default() -> Self {
        Self {
            indoor_ms: 30_000,
            outdoor_ms: 10_000,
            active_ms: 5_000,
            driving_ms: 2_000,
            deep_stationary_ms: 50_000,
        }
    }
}

impl PollingIntervals {
    const fn named(&self) -> [(&'static str, i64); 5] {
        [
            ("polling.indoor_ms", self.indoor_ms),
            ("polling.outdoor_ms", self.outdoor_ms),
            ("polling.active_ms", self.active_ms),
            ("polling.driving_ms", self.driving_ms),
            ("polling.deep_stationary_ms", self.deep_stationary_ms),
        ]
    }

    #[must_use]
    pub const fn for_state(&self, state: TrackingState) -> i64 {
        match state {
            TrackingState::Indoor => self.indoor_ms,
            TrackingState::Outdoor => self.outdoor_ms,
            TrackingState::Active => self.active_ms,
            TrackingState::Driving => self.driving_ms,
            TrackingState::DeepStationary => self.deep_stationary_ms,
        }
    }
}

/// All thresholds the classifier consults.
///
/// Durations are milliseconds, distances meters, speeds m/s, and step
/// thresholds are deltas of the cumulative step counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Period of the evaluation tick.
    pub tick_interval_ms: i64,

    /// GPS is considered unavailable once the newest fix is older than this.
    pub gps_timeout_ms: i64,

    /// Fixes with a larger accuracy radius are discarded.
    pub max_accuracy_meters: f64,

    pub deep_stationary_timeout_ms: i64,
    pub deep_stationary_step_threshold: u64,
    /// Linear acceleration magnitude (m/s²) that counts as motion.
    pub deep_stationary_acceleration_threshold: f64,

    pub driving_speed_threshold_mps: f64,
    pub driving_to_active_speed_threshold_mps: f64,
    pub driving_to_active_time_threshold_ms: i64,

    pub indoor_to_outdoor_step_threshold: u64,
    pub outdoor_to_active_step_threshold: u64,
    pub deep_stationary_to_active_step_threshold: u64,

    /// Minimum time in `Active` before the no-progress check applies.
    pub active_state_timeout_ms: i64,
    /// Travel below or at this distance while `Active` counts as no progress.
    pub active_state_distance_threshold_m: f64,

    /// Time spent stationary before the current trip is closed.
    pub trip_end_grace_ms: i64,

    /// Capacity of the location history ring buffer.
    pub location_history_capacity: usize,

    pub polling: PollingIntervals,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            gps_timeout_ms: 60_000,
            max_accuracy_meters: 200.0,
            deep_stationary_timeout_ms: 1_800_000, // 30 minutes
            deep_stationary_step_threshold: 10,
            deep_stationary_acceleration_threshold: 1.5,
            driving_speed_threshold_mps: 8.0,
            driving_to_active_speed_threshold_mps: 3.0,
            driving_to_active_time_threshold_ms: 120_000,
            indoor_to_outdoor_step_threshold: 20,
            outdoor_to_active_step_threshold: 50,
            deep_stationary_to_active_step_threshold: 20,
            active_state_timeout_ms: 300_000, // 5 minutes
            active_state_distance_threshold_m: 200.0,
            trip_end_grace_ms: 300_000,
            location_history_capacity: 32,
            polling: PollingIntervals::default(),
        }
    }
}

fn inconsistent(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Inconsistent {
        field,
        reason: reason.into(),
    }
}

fn require_positive_ms(field: &'static str, value: i64) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(inconsistent(field, format!("must be positive, got {value}")));
    }
    Ok(())
}

fn require_non_negative_ms(field: &'static str, value: i64) -> Result<(), ConfigError> {
    if value < 0 {
        return Err(inconsistent(field, format!("must not be negative, got {value}")));
    }
    Ok(())
}

fn require_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(inconsistent(
            field,
            format!("must be a finite non-negative number, got {value}"),
        ));
    }
    Ok(())
}

impl ThresholdConfig {
    /// Checks every threshold and the relations between them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive_ms("tick_interval_ms", self.tick_interval_ms)?;
        require_positive_ms("gps_timeout_ms", self.gps_timeout_ms)?;
        require_positive_ms("deep_stationary_timeout_ms", self.deep_stationary_timeout_ms)?;
        require_positive_ms("active_state_timeout_ms", self.active_state_timeout_ms)?;
        require_non_negative_ms(
            "driving_to_active_time_threshold_ms",
            self.driving_to_active_time_threshold_ms,
        )?;
        require_non_negative_ms("trip_end_grace_ms", self.trip_end_grace_ms)?;

        // A fix requested at the recommended cadence must land inside the GPS timeout
        for (field, interval) in self.polling.named() {
            require_positive_ms(field, interval)?;
            if interval >= self.gps_timeout_ms {
                return Err(inconsistent(
                    field,
                    format!(
                        "must be below gps_timeout_ms ({interval} >= {})",
                        self.gps_timeout_ms
                    ),
                ));
            }
        }

        require_non_negative("max_accuracy_meters", self.max_accuracy_meters)?;
        require_non_negative(
            "deep_stationary_acceleration_threshold",
            self.deep_stationary_acceleration_threshold,
        )?;
        require_non_negative("driving_speed_threshold_mps", self.driving_speed_threshold_mps)?;
        require_non_negative(
            "driving_to_active_speed_threshold_mps",
            self.driving_to_active_speed_threshold_mps,
        )?;
        require_non_negative(
            "active_state_distance_threshold_m",
            self.active_state_distance_threshold_m,
        )?;

        if self.driving_to_active_speed_threshold_mps >= self.driving_speed_threshold_mps {
            return Err(inconsistent(
                "driving_to_active_speed_threshold_mps",
                format!(
                    "must be below driving_speed_threshold_mps ({} >= {})",
                    self.driving_to_active_speed_threshold_mps, self.driving_speed_threshold_mps
                ),
            ));
        }

        if self.location_history_capacity < 2 {
            return Err(inconsistent(
                "location_history_capacity",
                format!(
                    "must hold at least two fixes, got {}",
                    self.location_history_capacity
                ),
            ));
        }

        Ok(())
    }

    /// Step delta needed to promote out of `state`, if promotion by steps applies.
    #[must_use]
    pub const fn step_threshold_for(&self, state: TrackingState) -> Option<u64> {
        match state {
            TrackingState::Indoor => Some(self.indoor_to_outdoor_step_threshold),
            TrackingState::Outdoor => Some(self.outdoor_to_active_step_threshold),
            TrackingState::DeepStationary => Some(self.deep_stationary_to_active_step_threshold),
            TrackingState::Active | TrackingState::Driving => None,
        }
    }
}
