//! Core domain logic for the motion tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Sensor input: validating GPS, accelerometer and step-counter samples
//! - Classification: the rule-ordered motion/context state machine
//! - Trips: one active trip spanning non-stationary activity
//! - Thresholds: the tunable, validated config the classifier reads

mod classifier;
pub mod clock;
pub mod config;
pub mod geo;
mod sampler;
pub mod trip;
pub mod types;

pub use classifier::{
    ClassifierSnapshot, StateClassifier, TaggedFix, TickOutcome, Transition, TransitionReason,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, PollingIntervals, ThresholdConfig};
pub use sampler::{SampleError, SensorAvailability, SensorSampler, StreamStats};
pub use trip::{TripManager, TripSession};
pub use types::{
    AccelerationSample, LocationSample, MotionClass, ParseError, SensorKind, StepSample,
    TrackingState, TripId,
};
