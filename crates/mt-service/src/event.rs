use mt_core::{TaggedFix, TrackingState, Transition, TripId, TripSession};
use serde::Serialize;

/// Something downstream consumers may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// An accepted GPS fix, tagged for storage or upload.
    Fix(TaggedFix),
    Transition(Transition),
    /// The foreground notification and polling cadence should follow `state`.
    Notification {
        state: TrackingState,
        text: &'static str,
        poll_interval_ms: i64,
    },
    TripStarted { trip_id: TripId, at_ms: i64 },
    TripEnded(TripSession),
}
