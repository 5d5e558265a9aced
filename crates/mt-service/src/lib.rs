//! Runs the motion classifier as a single-writer tokio task.
//!
//! Sensor callbacks and config reloads are queued to one worker that owns the
//! [`StateClassifier`](mt_core::StateClassifier). Readers get an immutable
//! snapshot republished after every command and tick; state changes and trip
//! boundaries are broadcast as [`TrackerEvent`]s.

mod error;
mod event;
mod handle;
mod worker;

pub use error::ServiceError;
pub use event::TrackerEvent;
pub use handle::{ServiceOptions, TrackerHandle, TrackerService};
