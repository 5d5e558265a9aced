//! Sanity checks for raw sensor callbacks.
//!
//! The sampler sits in front of the classifier's bookkeeping. Each sample is
//! checked completely before anything is recorded, so a rejected sample leaves
//! no trace other than a counter bump and (rate-limited) log line.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::types::{AccelerationSample, LocationSample, SensorKind, StepSample};

/// Reasons a sample is discarded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SampleError {
    /// The sample carries values no sensor can produce.
    #[error("invalid {sensor} sample: {reason}")]
    Invalid { sensor: SensorKind, reason: String },

    /// The sample is older than the last accepted sample of the same stream.
    #[error("out-of-order {sensor} sample: {timestamp_ms} ms precedes {last_ms} ms")]
    OutOfOrder {
        sensor: SensorKind,
        timestamp_ms: i64,
        last_ms: i64,
    },
}

impl SampleError {
    pub const fn sensor(&self) -> SensorKind {
        match self {
            Self::Invalid { sensor, .. } | Self::OutOfOrder { sensor, .. } => *sensor,
        }
    }
}

/// What is known about a sensor's presence on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorAvailability {
    /// No sample yet and nothing declared.
    #[default]
    Unknown,
    /// At least one sample has been accepted.
    Available,
    /// The platform reported the sensor as absent.
    Unavailable,
}

impl SensorAvailability {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for SensorAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stream counters exposed in debug info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StreamStats {
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct StreamState {
    last_timestamp_ms: Option<i64>,
    stats: StreamStats,
    /// Consecutive rejections since the last accepted sample.
    rejection_run: u64,
    availability: SensorAvailability,
}

impl StreamState {
    fn check_timestamp(&self, sensor: SensorKind, timestamp_ms: i64) -> Result<(), SampleError> {
        if timestamp_ms < 0 {
            return Err(SampleError::Invalid {
                sensor,
                reason: format!("negative timestamp {timestamp_ms}"),
            });
        }
        match self.last_timestamp_ms {
            Some(last_ms) if timestamp_ms < last_ms => Err(SampleError::OutOfOrder {
                sensor,
                timestamp_ms,
                last_ms,
            }),
            _ => Ok(()),
        }
    }

    fn accept(&mut self, sensor: SensorKind, timestamp_ms: i64) {
        if self.availability == SensorAvailability::Unavailable {
            tracing::info!(%sensor, "sensor delivered a sample after being declared unavailable");
        }
        self.availability = SensorAvailability::Available;
        self.last_timestamp_ms = Some(timestamp_ms);
        self.stats.accepted += 1;
        self.rejection_run = 0;
    }

    fn reject(&mut self, error: &SampleError) {
        self.stats.rejected += 1;
        if self.rejection_run == 0 {
            tracing::warn!(sensor = %error.sensor(), %error, "discarding sample");
        } else {
            tracing::debug!(
                sensor = %error.sensor(),
                %error,
                run = self.rejection_run + 1,
                "discarding sample"
            );
        }
        self.rejection_run += 1;
    }
}

/// Front door for the three sensor streams.
#[derive(Debug, Default)]
pub struct SensorSampler {
    gps: StreamState,
    accelerometer: StreamState,
    step_counter: StreamState,
}

fn invalid(sensor: SensorKind, reason: impl Into<String>) -> SampleError {
    SampleError::Invalid {
        sensor,
        reason: reason.into(),
    }
}

fn validate_location(sample: &LocationSample, max_accuracy_meters: f64) -> Result<(), SampleError> {
    let sensor = SensorKind::Gps;
    if !sample.latitude.is_finite() || !(-90.0..=90.0).contains(&sample.latitude) {
        return Err(invalid(sensor, format!("latitude {} out of range", sample.latitude)));
    }
    if !sample.longitude.is_finite() || !(-180.0..=180.0).contains(&sample.longitude) {
        return Err(invalid(
            sensor,
            format!("longitude {} out of range", sample.longitude),
        ));
    }
    if !sample.accuracy_meters.is_finite() || sample.accuracy_meters < 0.0 {
        return Err(invalid(
            sensor,
            format!("accuracy {} is not a valid radius", sample.accuracy_meters),
        ));
    }
    if sample.accuracy_meters > max_accuracy_meters {
        return Err(invalid(
            sensor,
            format!(
                "accuracy {} m exceeds limit of {max_accuracy_meters} m",
                sample.accuracy_meters
            ),
        ));
    }
    if !sample.altitude_meters.is_finite() {
        return Err(invalid(sensor, "altitude is not finite"));
    }
    Ok(())
}

fn validate_acceleration(sample: &AccelerationSample) -> Result<(), SampleError> {
    if !sample.magnitude.is_finite() || sample.magnitude < 0.0 {
        return Err(invalid(
            SensorKind::Accelerometer,
            format!("magnitude {} is not a valid norm", sample.magnitude),
        ));
    }
    Ok(())
}

impl SensorSampler {
    pub fn new() -> Self {
        Self::default()
    }

    const fn stream(&self, sensor: SensorKind) -> &StreamState {
        match sensor {
            SensorKind::Gps => &self.gps,
            SensorKind::Accelerometer => &self.accelerometer,
            SensorKind::StepCounter => &self.step_counter,
        }
    }

    const fn stream_mut(&mut self, sensor: SensorKind) -> &mut StreamState {
        match sensor {
            SensorKind::Gps => &mut self.gps,
            SensorKind::Accelerometer => &mut self.accelerometer,
            SensorKind::StepCounter => &mut self.step_counter,
        }
    }

    fn admit(
        &mut self,
        sensor: SensorKind,
        timestamp_ms: i64,
        check: Result<(), SampleError>,
    ) -> Result<(), SampleError> {
        let stream = self.stream_mut(sensor);
        match check.and_then(|()| stream.check_timestamp(sensor, timestamp_ms)) {
            Ok(()) => {
                stream.accept(sensor, timestamp_ms);
                Ok(())
            }
            Err(error) => {
                stream.reject(&error);
                Err(error)
            }
        }
    }

    /// Checks a GPS fix and, if it passes, records its timestamp.
    pub fn admit_location(
        &mut self,
        sample: &LocationSample,
        max_accuracy_meters: f64,
    ) -> Result<(), SampleError> {
        let check = validate_location(sample, max_accuracy_meters);
        self.admit(SensorKind::Gps, sample.timestamp_ms, check)
    }

    pub fn admit_acceleration(&mut self, sample: &AccelerationSample) -> Result<(), SampleError> {
        let check = validate_acceleration(sample);
        self.admit(SensorKind::Accelerometer, sample.timestamp_ms, check)
    }

    pub fn admit_steps(&mut self, sample: &StepSample) -> Result<(), SampleError> {
        self.admit(SensorKind::StepCounter, sample.timestamp_ms, Ok(()))
    }

    /// Records that the platform has no such sensor.
    ///
    /// The stream stays "unknown" for classification purposes until a sample
    /// for it arrives.
    pub fn declare_unavailable(&mut self, sensor: SensorKind) {
        let stream = self.stream_mut(sensor);
        if stream.availability != SensorAvailability::Unavailable {
            tracing::info!(%sensor, "sensor unavailable, treating input as unknown");
        }
        stream.availability = SensorAvailability::Unavailable;
    }

    pub const fn availability(&self, sensor: SensorKind) -> SensorAvailability {
        self.stream(sensor).availability
    }

    pub const fn stats(&self, sensor: SensorKind) -> StreamStats {
        self.stream(sensor).stats
    }
}
