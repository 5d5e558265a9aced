//! Trip sessions: contiguous spans of non-stationary activity.
//!
//! There is at most one active trip. Starting while one is active and ending
//! while none is active are both silent no-ops.

use std::collections::VecDeque;

use serde::Serialize;

use crate::geo::distance_meters;
use crate::types::{LocationSample, TripId};

/// Number of finished trips kept for summaries.
pub const RECENT_TRIPS_CAPACITY: usize = 16;

/// A single trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripSession {
    pub trip_id: TripId,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    /// Great-circle distance summed over consecutive recorded fixes.
    pub distance_meters: f64,
    pub fix_count: u64,
    #[serde(skip)]
    last_fix: Option<LocationSample>,
}

impl TripSession {
    fn start(start_time_ms: i64) -> Self {
        Self {
            trip_id: TripId::from_start(start_time_ms),
            start_time_ms,
            end_time_ms: None,
            distance_meters: 0.0,
            fix_count: 0,
            last_fix: None,
        }
    }

    pub const fn is_active(&self) -> bool {
        self.end_time_ms.is_none()
    }

    /// Elapsed time of the trip, up to `now_ms` while it is still active.
    pub fn duration_ms(&self, now_ms: i64) -> i64 {
        self.end_time_ms.unwrap_or(now_ms) - self.start_time_ms
    }

    fn record_fix(&mut self, sample: &LocationSample) {
        if let Some(previous) = &self.last_fix {
            self.distance_meters += distance_meters(previous, sample);
        }
        self.last_fix = Some(*sample);
        self.fix_count += 1;
    }
}

/// Owner of the single "current trip" pointer.
#[derive(Debug, Default)]
pub struct TripManager {
    current: Option<TripSession>,
    recent: VecDeque<TripSession>,
}

impl TripManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a trip unless one is already active.
    ///
    /// Returns the id of the newly started trip, or `None` for the no-op case.
    pub fn start_trip(&mut self, now_ms: i64) -> Option<TripId> {
        if let Some(active) = &self.current {
            tracing::debug!(trip_id = %active.trip_id, "trip already active, not starting another");
            return None;
        }
        let trip = TripSession::start(now_ms);
        let id = trip.trip_id.clone();
        tracing::info!(trip_id = %id, "trip started");
        self.current = Some(trip);
        Some(id)
    }

    /// Ends the active trip, if any, and returns it.
    pub fn end_trip(&mut self, now_ms: i64) -> Option<TripSession> {
        let mut trip = self.current.take()?;
        trip.end_time_ms = Some(now_ms.max(trip.start_time_ms));
        tracing::info!(
            trip_id = %trip.trip_id,
            distance_m = trip.distance_meters,
            fixes = trip.fix_count,
            "trip ended"
        );
        if self.recent.len() == RECENT_TRIPS_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(trip.clone());
        Some(trip)
    }

    pub fn current_trip_id(&self) -> Option<&TripId> {
        self.current.as_ref().map(|trip| &trip.trip_id)
    }

    pub const fn current(&self) -> Option<&TripSession> {
        self.current.as_ref()
    }

    /// Adds a fix to the active trip and returns the id it should be tagged with.
    pub fn record_fix(&mut self, sample: &LocationSample) -> Option<TripId> {
        let trip = self.current.as_mut()?;
        trip.record_fix(sample);
        Some(trip.trip_id.clone())
    }

    /// Finished trips, oldest first.
    pub fn recent_trips(&self) -> impl Iterator<Item = &TripSession> {
        self.recent.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_trip_twice_keeps_first_id() {
        let mut trips = TripManager::new();
        let first = trips.start_trip(1_000).unwrap();
        assert!(trips.start_trip(2_000).is_none());
        assert_eq!(trips.current_trip_id(), Some(&first));
        assert_eq!(trips.current().unwrap().start_time_ms, 1_000);
    }

    #[test]
    fn end_trip_without_active_is_noop() {
        let mut trips = TripManager::new();
        assert!(trips.end_trip(1_000).is_none());
        assert!(trips.current_trip_id().is_none());
        assert_eq!(trips.recent_trips().count(), 0);
    }

    #[test]
    fn end_trip_records_end_time_and_clears_current() {
        let mut trips = TripManager::new();
        trips.start_trip(1_000);
        let ended = trips.end_trip(61_000).unwrap();
        assert_eq!(ended.end_time_ms, Some(61_000));
        assert!(!ended.is_active());
        assert_eq!(ended.duration_ms(0), 60_000);
        assert!(trips.current_trip_id().is_none());
        assert_eq!(trips.recent_trips().count(), 1);
    }

    #[test]
    fn new_trip_after_end_gets_new_id() {
        let mut trips = TripManager::new();
        let first = trips.start_trip(1_000).unwrap();
        trips.end_trip(2_000);
        let second = trips.start_trip(3_000).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn fixes_are_tagged_only_while_active() {
        let mut trips = TripManager::new();
        let fix = LocationSample::new(0.0, 0.0, 5.0, 0);
        assert!(trips.record_fix(&fix).is_none());

        let id = trips.start_trip(0).unwrap();
        assert_eq!(trips.record_fix(&fix), Some(id));
    }

    #[test]
    fn distance_accumulates_between_fixes() {
        let mut trips = TripManager::new();
        trips.start_trip(0);
        trips.record_fix(&LocationSample::new(0.0, 0.0, 5.0, 0));
        trips.record_fix(&LocationSample::new(0.001, 0.0, 5.0, 10_000));
        trips.record_fix(&LocationSample::new(0.002, 0.0, 5.0, 20_000));
        let trip = trips.current().unwrap();
        assert_eq!(trip.fix_count, 3);
        assert!((trip.distance_meters - 222.39).abs() < 0.01, "got {}", trip.distance_meters);
    }

    #[test]
    fn recent_trips_are_bounded() {
        let mut trips = TripManager::new();
        for i in 0..(RECENT_TRIPS_CAPACITY as i64 + 4) {
            trips.start_trip(i * 1_000);
            trips.end_trip(i * 1_000 + 500);
        }
        assert_eq!(trips.recent_trips().count(), RECENT_TRIPS_CAPACITY);
        assert_eq!(trips.recent_trips().next().unwrap().start_time_ms, 4_000);
    }
}
