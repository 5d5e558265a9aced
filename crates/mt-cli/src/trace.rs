//! JSON-lines sensor traces.
//!
//! One event per line, tagged by `type`:
//!
//! ```text
//! {"type":"location","latitude":39.9042,"longitude":116.4074,"accuracy_meters":5,"timestamp_ms":0}
//! {"type":"acceleration","magnitude":0.4,"timestamp_ms":20}
//! {"type":"acceleration_axes","x":0.1,"y":0.2,"z":0.3,"timestamp_ms":40}
//! {"type":"steps","cumulative_count":1200,"timestamp_ms":1000}
//! {"type":"unavailable","sensor":"step_counter","timestamp_ms":0}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;

use anyhow::{Context, Result};
use mt_core::{
    AccelerationSample, LocationSample, SampleError, SensorKind, StateClassifier, StepSample,
};
use mt_service::{ServiceError, TrackerHandle};
use serde::{Deserialize, Serialize};

/// One line of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Location(LocationSample),
    Acceleration(AccelerationSample),
    /// Raw accelerometer axes in m/s², reduced to a magnitude when applied.
    AccelerationAxes {
        x: f64,
        y: f64,
        z: f64,
        timestamp_ms: i64,
    },
    Steps(StepSample),
    /// The platform reports it has no such sensor.
    Unavailable { sensor: SensorKind, timestamp_ms: i64 },
}

impl TraceEvent {
    pub const fn timestamp_ms(&self) -> i64 {
        match self {
            Self::Location(sample) => sample.timestamp_ms,
            Self::Acceleration(sample) => sample.timestamp_ms,
            Self::Steps(sample) => sample.timestamp_ms,
            Self::AccelerationAxes { timestamp_ms, .. } | Self::Unavailable { timestamp_ms, .. } => {
                *timestamp_ms
            }
        }
    }

    /// Feeds the event straight into a classifier.
    pub fn apply(&self, classifier: &mut StateClassifier) -> Result<(), SampleError> {
        match *self {
            Self::Location(sample) => classifier.on_location(sample).map(|_| ()),
            Self::Acceleration(sample) => classifier.on_acceleration(sample),
            Self::AccelerationAxes {
                x,
                y,
                z,
                timestamp_ms,
            } => classifier.on_acceleration(AccelerationSample::from_axes(x, y, z, timestamp_ms)),
            Self::Steps(sample) => classifier.on_step_count(sample),
            Self::Unavailable { sensor, .. } => {
                classifier.declare_unavailable(sensor);
                Ok(())
            }
        }
    }

    /// Queues the event on a running tracker.
    pub fn send(&self, handle: &TrackerHandle) -> Result<(), ServiceError> {
        match *self {
            Self::Location(sample) => handle.on_location(sample),
            Self::Acceleration(sample) => handle.on_acceleration(sample),
            Self::AccelerationAxes {
                x,
                y,
                z,
                timestamp_ms,
            } => handle.on_acceleration(AccelerationSample::from_axes(x, y, z, timestamp_ms)),
            Self::Steps(sample) => handle.on_step_count(sample),
            Self::Unavailable { sensor, .. } => handle.declare_unavailable(sensor),
        }
    }
}

/// Parses a single trace line. Returns `None` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<TraceEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let event = serde_json::from_str(trimmed).context("invalid trace event")?;
    Ok(Some(event))
}

/// Reads a whole trace.
pub fn parse_trace<R: BufRead>(reader: R) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read trace")?;
        if let Some(event) = parse_line(&line).with_context(|| format!("line {}", index + 1))? {
            events.push(event);
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_event_type() {
        let trace = r#"
# morning walk
{"type":"location","latitude":39.9042,"longitude":116.4074,"accuracy_meters":5,"timestamp_ms":0}
{"type":"acceleration","magnitude":0.4,"timestamp_ms":20}
{"type":"acceleration_axes","x":3.0,"y":4.0,"z":0.0,"timestamp_ms":40}

{"type":"steps","cumulative_count":1200,"timestamp_ms":1000}
{"type":"unavailable","sensor":"step_counter","timestamp_ms":1000}
"#;
        let events = parse_trace(trace.as_bytes()).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            TraceEvent::Location(LocationSample::new(39.9042, 116.4074, 5.0, 0))
        );
        assert_eq!(events[3], TraceEvent::Steps(StepSample::new(1_200, 1_000)));
        assert_eq!(
            events[4],
            TraceEvent::Unavailable {
                sensor: SensorKind::StepCounter,
                timestamp_ms: 1_000
            }
        );
        assert_eq!(events[2].timestamp_ms(), 40);
    }

    #[test]
    fn reports_the_failing_line() {
        let trace = "{\"type\":\"steps\",\"cumulative_count\":1,\"timestamp_ms\":0}\n{\"type\":\"teleport\"}\n";
        let err = parse_trace(trace.as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "line 2");
        assert!(format!("{err:#}").contains("invalid trace event"));
    }

    #[test]
    fn axes_are_reduced_to_magnitude() {
        let mut classifier =
            StateClassifier::new(mt_core::ThresholdConfig::default(), 0).unwrap();
        let event = TraceEvent::AccelerationAxes {
            x: 3.0,
            y: 4.0,
            z: 0.0,
            timestamp_ms: 10,
        };
        event.apply(&mut classifier).unwrap();
        assert_eq!(classifier.last_acceleration(), Some(5.0));
    }
}
