//! Core type definitions: tracking states, sensor samples and trip identifiers.

use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parse error for the string forms of core enums.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unknown tracking state name.
    #[error("invalid tracking state: {value}")]
    InvalidTrackingState { value: String },

    /// Unknown sensor name.
    #[error("invalid sensor kind: {value}")]
    InvalidSensorKind { value: String },
}

/// The operating mode the device is currently classified in.
///
/// Exactly one state is current at any instant. Any state may transition to any
/// other; the usual cycle is `Indoor -> Outdoor -> Active -> Driving` and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// No usable GPS, or stationary with GPS but no movement evidence.
    #[default]
    Indoor,
    /// GPS available and the user has walked out.
    Outdoor,
    /// Walking or otherwise moving on foot.
    Active,
    /// Moving faster than walking pace.
    Driving,
    /// Long period without steps or acceleration.
    DeepStationary,
}

/// Coarse grouping of tracking states used for trip boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionClass {
    Stationary,
    Moving,
}

impl TrackingState {
    /// All states, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Indoor,
        Self::Outdoor,
        Self::Active,
        Self::Driving,
        Self::DeepStationary,
    ];

    /// String representation used in logs, debug maps and traces.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Indoor => "indoor",
            Self::Outdoor => "outdoor",
            Self::Active => "active",
            Self::Driving => "driving",
            Self::DeepStationary => "deep_stationary",
        }
    }

    #[must_use]
    pub const fn motion_class(&self) -> MotionClass {
        match self {
            Self::Indoor | Self::DeepStationary => MotionClass::Stationary,
            Self::Outdoor | Self::Active | Self::Driving => MotionClass::Moving,
        }
    }

    #[must_use]
    pub const fn is_moving(&self) -> bool {
        matches!(self.motion_class(), MotionClass::Moving)
    }

    /// Text shown in the foreground-service notification.
    #[must_use]
    pub const fn notification_text(&self) -> &'static str {
        match self {
            Self::Indoor => "Indoors - GPS paused",
            Self::Outdoor => "Outdoors - tracking location",
            Self::Active => "Moving - tracking location",
            Self::Driving => "Driving - high-rate tracking",
            Self::DeepStationary => "Stationary - power saving",
        }
    }
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrackingState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseError::InvalidTrackingState {
                value: s.to_string(),
            })
    }
}

/// Identifies one of the three sensor sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Gps,
    Accelerometer,
    StepCounter,
}

impl SensorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gps => "gps",
            Self::Accelerometer => "accelerometer",
            Self::StepCounter => "step_counter",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SensorKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gps" => Ok(Self::Gps),
            "accelerometer" => Ok(Self::Accelerometer),
            "step_counter" => Ok(Self::StepCounter),
            _ => Err(ParseError::InvalidSensorKind {
                value: s.to_string(),
            }),
        }
    }
}

/// A single GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude_meters: f64,
    pub accuracy_meters: f64,
    pub timestamp_ms: i64,
}

impl LocationSample {
    /// Creates a fix at sea level.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, accuracy_meters: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_meters: 0.0,
            accuracy_meters,
            timestamp_ms,
        }
    }
}

/// Magnitude of the linear (gravity-removed) acceleration vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSample {
    /// Euclidean norm in m/s².
    pub magnitude: f64,
    pub timestamp_ms: i64,
}

impl AccelerationSample {
    #[must_use]
    pub const fn new(magnitude: f64, timestamp_ms: i64) -> Self {
        Self {
            magnitude,
            timestamp_ms,
        }
    }

    /// Builds a sample from the three accelerometer axes.
    #[must_use]
    pub fn from_axes(x: f64, y: f64, z: f64, timestamp_ms: i64) -> Self {
        Self::new(x.mul_add(x, y.mul_add(y, z * z)).sqrt(), timestamp_ms)
    }
}

/// A reading of the hardware step counter, cumulative since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSample {
    pub cumulative_count: u64,
    pub timestamp_ms: i64,
}

impl StepSample {
    #[must_use]
    pub const fn new(cumulative_count: u64, timestamp_ms: i64) -> Self {
        Self {
            cumulative_count,
            timestamp_ms,
        }
    }
}

/// Opaque, time-derived trip identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(String);

impl TripId {
    /// Derives an identifier from the trip's start time.
    ///
    /// Format: `trip-20261019T143000.123Z`. Timestamps outside chrono's range fall
    /// back to the raw millisecond value.
    #[must_use]
    pub fn from_start(start_ms: i64) -> Self {
        let id = DateTime::from_timestamp_millis(start_ms).map_or_else(
            || format!("trip-{start_ms}"),
            |dt| format!("trip-{}", dt.format("%Y%m%dT%H%M%S%.3fZ")),
        );
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TripId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<TripId> for String {
    fn from(id: TripId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_state_from_str_roundtrips() {
        for state in TrackingState::ALL {
            assert_eq!(state.as_str().parse::<TrackingState>().unwrap(), state);
        }
        assert!("flying".parse::<TrackingState>().is_err());
    }

    #[test]
    fn tracking_state_serde_uses_snake_case() {
        let json = serde_json::to_string(&TrackingState::DeepStationary).unwrap();
        assert_eq!(json, "\"deep_stationary\"");
        let parsed: TrackingState = serde_json::from_str("\"driving\"").unwrap();
        assert_eq!(parsed, TrackingState::Driving);
    }

    #[test]
    fn motion_class_splits_stationary_and_moving() {
        assert!(!TrackingState::Indoor.is_moving());
        assert!(!TrackingState::DeepStationary.is_moving());
        assert!(TrackingState::Outdoor.is_moving());
        assert!(TrackingState::Active.is_moving());
        assert!(TrackingState::Driving.is_moving());
    }

    #[test]
    fn sensor_kind_from_str() {
        assert_eq!("gps".parse::<SensorKind>().unwrap(), SensorKind::Gps);
        assert_eq!(
            "step_counter".parse::<SensorKind>().unwrap(),
            SensorKind::StepCounter
        );
        assert!("barometer".parse::<SensorKind>().is_err());
    }

    #[test]
    fn acceleration_from_axes_is_euclidean_norm() {
        let sample = AccelerationSample::from_axes(3.0, 4.0, 12.0, 0);
        assert!((sample.magnitude - 13.0).abs() < 1e-12);
    }

    #[test]
    fn trip_id_is_derived_from_start_time() {
        // 2024-01-15T10:30:00.250Z
        let id = TripId::from_start(1_705_314_600_250);
        assert_eq!(id.as_str(), "trip-20240115T103000.250Z");
    }

    #[test]
    fn location_sample_deserializes_without_altitude() {
        let json = r#"{"latitude":1.0,"longitude":2.0,"accuracy_meters":5.0,"timestamp_ms":10}"#;
        let sample: LocationSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample, LocationSample::new(1.0, 2.0, 5.0, 10));
    }
}
