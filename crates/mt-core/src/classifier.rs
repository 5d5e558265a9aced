//! Motion/context state machine.
//!
//! The classifier keeps the latest value of each sensor stream plus a small
//! amount of per-state bookkeeping, and on every tick evaluates a fixed list of
//! rules in priority order. The first rule that matches decides the next
//! state; a rule whose target is the current state keeps it without re-entry.
//!
//! # Rules (highest priority first)
//!
//! 1. GPS timeout: no fix newer than `gps_timeout_ms` ⇒ `Indoor`.
//! 2. Deep stationary: long enough in the state, few steps, no motion ⇒ `DeepStationary`.
//! 3. Driving: speed between the last two fixes above threshold ⇒ `Driving`.
//! 4. Step promotion: step delta since state entry reaches the state's threshold.
//! 5. No progress while `Active`: timed out near the anchor ⇒ `Indoor`.
//! 6. Slowdown while `Driving`: slow for long enough ⇒ `Active`.
//! 7. Wake from `DeepStationary` on acceleration ⇒ `Outdoor`; otherwise unchanged.
//!
//! All mutation goes through `&mut self`; the owner serializes sensor updates
//! and ticks.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::Serialize;

use crate::config::{ConfigError, ThresholdConfig};
use crate::geo::{distance_meters, speed_mps};
use crate::sampler::{SampleError, SensorAvailability, SensorSampler};
use crate::trip::{TripManager, TripSession};
use crate::types::{
    AccelerationSample, LocationSample, SensorKind, StepSample, TrackingState, TripId,
};

/// Which rule produced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    GpsTimeout,
    DeepStationary,
    DrivingSpeed,
    StepThreshold,
    ActiveNoProgress,
    DrivingSlowdown,
    MotionWake,
}

impl TransitionReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GpsTimeout => "gps_timeout",
            Self::DeepStationary => "deep_stationary",
            Self::DrivingSpeed => "driving_speed",
            Self::StepThreshold => "step_threshold",
            Self::ActiveNoProgress => "active_no_progress",
            Self::DrivingSlowdown => "driving_slowdown",
            Self::MotionWake => "motion_wake",
        }
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change produced by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: TrackingState,
    pub to: TrackingState,
    pub at_ms: i64,
    pub reason: TransitionReason,
}

/// Everything a tick changed.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// State after the tick.
    pub state: TrackingState,
    pub transition: Option<Transition>,
    pub trip_started: Option<TripId>,
    pub trip_ended: Option<TripSession>,
}

/// A GPS fix tagged with the state and trip it was recorded in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedFix {
    pub sample: LocationSample,
    pub state: TrackingState,
    pub trip_id: Option<TripId>,
}

/// Values captured when a state is entered. Replaced whole on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StateEntry {
    state: TrackingState,
    entered_at_ms: i64,
    /// Step counter at entry, or the first reading after entry if none was known.
    step_baseline: Option<u64>,
    /// Last acceleration at or above the deep-stationary threshold in this state.
    last_motion_at_ms: Option<i64>,
    /// While driving: since when speed has stayed below the slowdown threshold.
    slow_since_ms: Option<i64>,
}

impl StateEntry {
    const fn enter(state: TrackingState, now_ms: i64, step_count: Option<u64>) -> Self {
        Self {
            state,
            entered_at_ms: now_ms,
            step_baseline: step_count,
            last_motion_at_ms: None,
            slow_since_ms: None,
        }
    }
}

/// Reference point for the no-progress check while `Active`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ActiveAnchor {
    started_at_ms: i64,
    location: Option<LocationSample>,
}

/// Mutable classifier state. Never shared, never persisted.
#[derive(Debug)]
struct Bookkeeping {
    entry: StateEntry,
    last_gps_timestamp_ms: Option<i64>,
    last_acceleration: Option<AccelerationSample>,
    current_step_count: Option<u64>,
    last_known_location: Option<LocationSample>,
    location_history: VecDeque<LocationSample>,
    active_anchor: Option<ActiveAnchor>,
    /// When the device entered the stationary class; drives trip end.
    stationary_since_ms: Option<i64>,
}

/// Result of evaluating the rules, before it is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Decision {
    Stay,
    Transition(TrackingState, TransitionReason),
    /// Still `Active` but moved: restart the no-progress window here.
    Reanchor,
}

/// Immutable view of the classifier for other threads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierSnapshot {
    pub taken_at_ms: i64,
    pub state: TrackingState,
    pub state_entered_at_ms: i64,
    pub gps_available: bool,
    pub last_gps_timestamp_ms: Option<i64>,
    pub step_count: Option<u64>,
    pub step_delta: u64,
    pub last_acceleration: Option<f64>,
    pub speed_mps: Option<f64>,
    pub trip_id: Option<TripId>,
    pub poll_interval_ms: i64,
    pub notification_text: &'static str,
    pub debug: BTreeMap<String, String>,
}

/// The motion/context state machine.
#[derive(Debug)]
pub struct StateClassifier {
    config: ThresholdConfig,
    sampler: SensorSampler,
    book: Bookkeeping,
    trips: TripManager,
    ticks: u64,
    transitions: u64,
}

fn format_opt<T: fmt::Display>(value: Option<T>, none: &str) -> String {
    value.map_or_else(|| none.to_string(), |v| v.to_string())
}

impl StateClassifier {
    /// Creates a classifier in `Indoor`, entered at `now_ms`.
    pub fn new(config: ThresholdConfig, now_ms: i64) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.location_history_capacity;
        Ok(Self {
            config,
            sampler: SensorSampler::new(),
            book: Bookkeeping {
                entry: StateEntry::enter(TrackingState::Indoor, now_ms, None),
                last_gps_timestamp_ms: None,
                last_acceleration: None,
                current_step_count: None,
                last_known_location: None,
                location_history: VecDeque::with_capacity(capacity),
                active_anchor: None,
                stationary_since_ms: Some(now_ms),
            },
            trips: TripManager::new(),
            ticks: 0,
            transitions: 0,
        })
    }

    pub const fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Swaps in a new config. An invalid config is rejected and the current one kept.
    pub fn replace_config(&mut self, config: ThresholdConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let history = &mut self.book.location_history;
        while history.len() > config.location_history_capacity {
            history.pop_front();
        }
        tracing::info!(
            tick_interval_ms = config.tick_interval_ms,
            gps_timeout_ms = config.gps_timeout_ms,
            "threshold config replaced"
        );
        self.config = config;
        Ok(())
    }

    // ========================================================================
    // Sensor input
    // ========================================================================

    /// Records a GPS fix and returns it tagged with the current state and trip.
    pub fn on_location(&mut self, sample: LocationSample) -> Result<TaggedFix, SampleError> {
        self.sampler
            .admit_location(&sample, self.config.max_accuracy_meters)?;

        let book = &mut self.book;
        book.last_gps_timestamp_ms = Some(sample.timestamp_ms);
        book.last_known_location = Some(sample);
        if book.location_history.len() == self.config.location_history_capacity {
            book.location_history.pop_front();
        }
        book.location_history.push_back(sample);

        self.trips.record_fix(&sample);
        Ok(self.tag_fix(sample))
    }

    /// Tags a fix with the current state and active trip without recording it.
    pub fn tag_fix(&self, sample: LocationSample) -> TaggedFix {
        TaggedFix {
            sample,
            state: self.book.entry.state,
            trip_id: self.trips.current_trip_id().cloned(),
        }
    }

    pub fn on_acceleration(&mut self, sample: AccelerationSample) -> Result<(), SampleError> {
        self.sampler.admit_acceleration(&sample)?;
        self.book.last_acceleration = Some(sample);
        if sample.magnitude >= self.config.deep_stationary_acceleration_threshold {
            self.book.entry.last_motion_at_ms = Some(sample.timestamp_ms);
        }
        Ok(())
    }

    pub fn on_step_count(&mut self, sample: StepSample) -> Result<(), SampleError> {
        self.sampler.admit_steps(&sample)?;
        let count = sample.cumulative_count;
        let entry = &mut self.book.entry;
        match entry.step_baseline {
            None => entry.step_baseline = Some(count),
            Some(baseline) if count < baseline => {
                tracing::info!(baseline, count, "step counter went backwards, rebasing");
                entry.step_baseline = Some(count);
            }
            Some(_) => {}
        }
        self.book.current_step_count = Some(count);
        Ok(())
    }

    /// Marks a sensor as absent. Its input stays unknown.
    pub fn declare_unavailable(&mut self, sensor: SensorKind) {
        self.sampler.declare_unavailable(sensor);
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluates the rules once at `now_ms` and applies the result.
    pub fn tick(&mut self, now_ms: i64) -> TickOutcome {
        self.ticks += 1;
        let speed = self.current_speed_mps();
        self.track_slowdown(now_ms, speed);

        let mut outcome = TickOutcome {
            state: self.book.entry.state,
            transition: None,
            trip_started: None,
            trip_ended: None,
        };

        match self.evaluate(now_ms, speed) {
            Decision::Stay => {}
            Decision::Reanchor => {
                tracing::debug!("active but travelling, moving anchor");
                self.book.active_anchor = Some(ActiveAnchor {
                    started_at_ms: now_ms,
                    location: self.book.last_known_location,
                });
            }
            Decision::Transition(to, reason) => {
                let transition = Transition {
                    from: self.book.entry.state,
                    to,
                    at_ms: now_ms,
                    reason,
                };
                outcome.trip_started = self.enter_state(to, now_ms);
                outcome.state = to;
                outcome.transition = Some(transition);
                tracing::info!(
                    from = %transition.from,
                    to = %transition.to,
                    reason = %reason,
                    "state transition"
                );
            }
        }

        outcome.trip_ended = self.close_trip_if_settled(now_ms);
        outcome
    }

    fn evaluate(&self, now_ms: i64, speed: Option<f64>) -> Decision {
        let config = &self.config;
        let entry = &self.book.entry;
        let state = entry.state;
        let decide = |target: TrackingState, reason: TransitionReason| {
            if target == state {
                Decision::Stay
            } else {
                Decision::Transition(target, reason)
            }
        };

        // 1. GPS timeout
        if !self.is_gps_available(now_ms) {
            return decide(TrackingState::Indoor, TransitionReason::GpsTimeout);
        }

        // 2. Deep stationary
        let time_in_state = now_ms - entry.entered_at_ms;
        let step_delta = self.step_delta();
        if state != TrackingState::DeepStationary
            && time_in_state > config.deep_stationary_timeout_ms
            && step_delta < config.deep_stationary_step_threshold
            && entry
                .last_motion_at_ms
                .is_none_or(|at| now_ms - at > config.deep_stationary_timeout_ms)
        {
            return decide(TrackingState::DeepStationary, TransitionReason::DeepStationary);
        }

        // 3. Driving
        if speed.is_some_and(|s| s > config.driving_speed_threshold_mps) {
            return decide(TrackingState::Driving, TransitionReason::DrivingSpeed);
        }

        // 4. Step promotion
        if let Some(threshold) = config.step_threshold_for(state) {
            if step_delta >= threshold {
                let target = match state {
                    TrackingState::Indoor => TrackingState::Outdoor,
                    _ => TrackingState::Active,
                };
                return decide(target, TransitionReason::StepThreshold);
            }
        }

        // 5. No progress while active
        if state == TrackingState::Active {
            if let Some(anchor) = &self.book.active_anchor {
                if now_ms - anchor.started_at_ms > config.active_state_timeout_ms {
                    let travelled = match (&anchor.location, &self.book.last_known_location) {
                        (Some(from), Some(to)) => Some(distance_meters(from, to)),
                        _ => None,
                    };
                    return match travelled {
                        Some(d) if d <= config.active_state_distance_threshold_m => {
                            decide(TrackingState::Indoor, TransitionReason::ActiveNoProgress)
                        }
                        _ => Decision::Reanchor,
                    };
                }
            }
        }

        // 6. Slowdown while driving
        if state == TrackingState::Driving {
            if let Some(since) = entry.slow_since_ms {
                if now_ms - since >= config.driving_to_active_time_threshold_ms {
                    return decide(TrackingState::Active, TransitionReason::DrivingSlowdown);
                }
            }
        }

        // 7. Wake from deep stationary, otherwise unchanged
        if state == TrackingState::DeepStationary && entry.last_motion_at_ms.is_some() {
            return decide(TrackingState::Outdoor, TransitionReason::MotionWake);
        }

        Decision::Stay
    }

    fn track_slowdown(&mut self, now_ms: i64, speed: Option<f64>) {
        let entry = &mut self.book.entry;
        if entry.state != TrackingState::Driving {
            return;
        }
        match speed {
            Some(s) if s < self.config.driving_to_active_speed_threshold_mps => {
                entry.slow_since_ms.get_or_insert(now_ms);
            }
            Some(_) => entry.slow_since_ms = None,
            None => {}
        }
    }

    /// Replaces the state-entry record and updates anchor and trip bookkeeping.
    fn enter_state(&mut self, to: TrackingState, now_ms: i64) -> Option<TripId> {
        let from = self.book.entry.state;
        self.book.entry = StateEntry::enter(to, now_ms, self.book.current_step_count);
        self.transitions += 1;

        self.book.active_anchor = (to == TrackingState::Active).then_some(ActiveAnchor {
            started_at_ms: now_ms,
            location: self.book.last_known_location,
        });

        if !to.is_moving() {
            if from.is_moving() {
                self.book.stationary_since_ms = Some(now_ms);
            }
            return None;
        }

        self.book.stationary_since_ms = None;
        if from.is_moving() {
            return None;
        }
        let started = self.trips.start_trip(now_ms)?;
        if let Some(fix) = self.book.last_known_location {
            self.trips.record_fix(&fix);
        }
        Some(started)
    }

    fn close_trip_if_settled(&mut self, now_ms: i64) -> Option<TripSession> {
        let since = self.book.stationary_since_ms?;
        if self.trips.current().is_none() || now_ms - since <= self.config.trip_end_grace_ms {
            return None;
        }
        self.trips.end_trip(now_ms)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub const fn current_state(&self) -> TrackingState {
        self.book.entry.state
    }

    /// Whether a fix newer than the GPS timeout exists.
    ///
    /// A GPS declared unavailable counts as timed out until the next fix.
    pub fn is_gps_available(&self, now_ms: i64) -> bool {
        if self.sampler.availability(SensorKind::Gps) == SensorAvailability::Unavailable {
            return false;
        }
        self.book
            .last_gps_timestamp_ms
            .is_some_and(|at| now_ms - at <= self.config.gps_timeout_ms)
    }

    /// Latest cumulative step count, if the step counter has reported.
    pub const fn step_count(&self) -> Option<u64> {
        self.book.current_step_count
    }

    /// Steps taken since the current state was entered.
    pub fn step_delta(&self) -> u64 {
        match (self.book.current_step_count, self.book.entry.step_baseline) {
            (Some(current), Some(baseline)) => current.saturating_sub(baseline),
            _ => 0,
        }
    }

    pub fn last_acceleration(&self) -> Option<f64> {
        self.book.last_acceleration.map(|a| a.magnitude)
    }

    /// Speed between the two most recent fixes.
    pub fn current_speed_mps(&self) -> Option<f64> {
        let history = &self.book.location_history;
        let len = history.len();
        if len < 2 {
            return None;
        }
        speed_mps(&history[len - 2], &history[len - 1])
    }

    pub fn current_trip_id(&self) -> Option<&TripId> {
        self.trips.current_trip_id()
    }

    pub const fn trips(&self) -> &TripManager {
        &self.trips
    }

    /// Recommended GPS polling interval for the current state.
    pub const fn poll_interval_ms(&self) -> i64 {
        self.config.polling.for_state(self.book.entry.state)
    }

    /// Diagnostic key/value view.
    pub fn debug_info(&self, now_ms: i64) -> BTreeMap<String, String> {
        let book = &self.book;
        let mut info = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            info.insert(key.to_string(), value);
        };

        put("state", book.entry.state.to_string());
        put(
            "time_in_state_ms",
            (now_ms - book.entry.entered_at_ms).to_string(),
        );
        put("gps_available", self.is_gps_available(now_ms).to_string());
        put(
            "last_gps_age_ms",
            format_opt(book.last_gps_timestamp_ms.map(|at| now_ms - at), "none"),
        );
        put("step_count", format_opt(book.current_step_count, "unknown"));
        put("step_baseline", format_opt(book.entry.step_baseline, "unknown"));
        put("step_delta", self.step_delta().to_string());
        put(
            "last_acceleration",
            format_opt(self.last_acceleration().map(|a| format!("{a:.3}")), "unknown"),
        );
        put(
            "speed_mps",
            format_opt(self.current_speed_mps().map(|s| format!("{s:.2}")), "unknown"),
        );
        put("location_history_len", book.location_history.len().to_string());
        put("poll_interval_ms", self.poll_interval_ms().to_string());
        put("ticks", self.ticks.to_string());
        put("transitions", self.transitions.to_string());

        if let Some(anchor) = &book.active_anchor {
            put(
                "active_anchor_age_ms",
                (now_ms - anchor.started_at_ms).to_string(),
            );
            let travelled = anchor
                .location
                .as_ref()
                .zip(book.last_known_location.as_ref())
                .map(|(from, to)| format!("{:.1}", distance_meters(from, to)));
            put("active_anchor_distance_m", format_opt(travelled, "unknown"));
        }

        match self.trips.current() {
            Some(trip) => {
                put("trip_id", trip.trip_id.to_string());
                put("trip_distance_m", format!("{:.1}", trip.distance_meters));
                put("trip_fix_count", trip.fix_count.to_string());
            }
            None => put("trip_id", "none".to_string()),
        }

        for sensor in [
            SensorKind::Gps,
            SensorKind::Accelerometer,
            SensorKind::StepCounter,
        ] {
            let stats = self.sampler.stats(sensor);
            put(&format!("{sensor}.accepted"), stats.accepted.to_string());
            put(&format!("{sensor}.rejected"), stats.rejected.to_string());
            put(
                &format!("{sensor}.availability"),
                self.sampler.availability(sensor).to_string(),
            );
        }

        info
    }

    pub const fn sensor_availability(&self, sensor: SensorKind) -> SensorAvailability {
        self.sampler.availability(sensor)
    }

    /// Captures an immutable view for readers on other threads.
    pub fn snapshot(&self, now_ms: i64) -> ClassifierSnapshot {
        let state = self.book.entry.state;
        ClassifierSnapshot {
            taken_at_ms: now_ms,
            state,
            state_entered_at_ms: self.book.entry.entered_at_ms,
            gps_available: self.is_gps_available(now_ms),
            last_gps_timestamp_ms: self.book.last_gps_timestamp_ms,
            step_count: self.book.current_step_count,
            step_delta: self.step_delta(),
            last_acceleration: self.last_acceleration(),
            speed_mps: self.current_speed_mps(),
            trip_id: self.trips.current_trip_id().cloned(),
            poll_interval_ms: self.poll_interval_ms(),
            notification_text: state.notification_text(),
            debug: self.debug_info(now_ms),
        }
    }
}
