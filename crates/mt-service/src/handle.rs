//! Public face of the service: spawning, feeding and querying the tracker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mt_core::{
    AccelerationSample, ClassifierSnapshot, Clock, LocationSample, SensorKind, StateClassifier,
    StepSample, ThresholdConfig, TrackingState, TripId,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::ServiceError;
use crate::event::TrackerEvent;
use crate::worker::{Command, Worker};

/// Sizing and behavior knobs for [`TrackerService::spawn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Queued commands before sensor samples start being dropped.
    pub command_capacity: usize,
    /// Events buffered per subscriber before a slow one starts lagging.
    pub event_capacity: usize,
    /// Tick on `tick_interval_ms`. When off, only `evaluate_now` ticks.
    pub periodic: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            command_capacity: 256,
            event_capacity: 64,
            periodic: true,
        }
    }
}

/// Owner of the worker task.
#[derive(Debug)]
pub struct TrackerService {
    handle: TrackerHandle,
    task: JoinHandle<()>,
}

impl TrackerService {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(
        config: ThresholdConfig,
        clock: Arc<dyn Clock>,
        options: ServiceOptions,
    ) -> Result<Self, ServiceError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ServiceError::NoRuntime)?;

        let classifier = StateClassifier::new(config, clock.now_ms())?;
        let (command_tx, command_rx) = mpsc::channel(options.command_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) =
            watch::channel(Arc::new(classifier.snapshot(clock.now_ms())));
        let (event_tx, _) = broadcast::channel(options.event_capacity.max(1));

        let worker = Worker {
            classifier,
            clock,
            commands: command_rx,
            shutdown: shutdown_rx,
            snapshots: snapshot_tx,
            events: event_tx.clone(),
            periodic: options.periodic,
        };
        let task = runtime.spawn(worker.run());

        Ok(Self {
            handle: TrackerHandle {
                commands: command_tx,
                shutdown: Arc::new(shutdown_tx),
                snapshots: snapshot_rx,
                events: event_tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            task,
        })
    }

    /// A cloneable handle for sensor callbacks and readers.
    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        self.handle.shutdown();
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "tracker task failed");
            ServiceError::Stopped
        })
    }
}

/// Cheap to clone. All clones talk to the same worker.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
    shutdown: Arc<watch::Sender<bool>>,
    snapshots: watch::Receiver<Arc<ClassifierSnapshot>>,
    events: broadcast::Sender<TrackerEvent>,
    dropped: Arc<AtomicU64>,
}

impl TrackerHandle {
    // ========================================================================
    // Inbound
    // ========================================================================

    /// Queues a GPS fix. Never blocks; a full queue drops the sample.
    pub fn on_location(&self, sample: LocationSample) -> Result<(), ServiceError> {
        self.offer(Command::Location(sample))
    }

    pub fn on_acceleration(&self, sample: AccelerationSample) -> Result<(), ServiceError> {
        self.offer(Command::Acceleration(sample))
    }

    pub fn on_step_count(&self, sample: StepSample) -> Result<(), ServiceError> {
        self.offer(Command::Steps(sample))
    }

    pub fn declare_unavailable(&self, sensor: SensorKind) -> Result<(), ServiceError> {
        self.offer(Command::DeclareUnavailable(sensor))
    }

    fn offer(&self, command: Command) -> Result<(), ServiceError> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(command = command.kind(), dropped, "command queue full, dropping");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ServiceError::Stopped),
        }
    }

    /// Validates and swaps in `config`. A rejected config leaves the old one active.
    pub async fn reload_config(&self, config: ThresholdConfig) -> Result<(), ServiceError> {
        let (ack, reply) = oneshot::channel();
        self.commands
            .send(Command::ReloadConfig { config, ack })
            .await
            .map_err(|_| ServiceError::Stopped)?;
        reply.await.map_err(|_| ServiceError::Stopped)??;
        Ok(())
    }

    /// Runs one evaluation immediately and returns the resulting state.
    pub async fn evaluate_now(&self) -> Result<TrackingState, ServiceError> {
        let (ack, reply) = oneshot::channel();
        self.commands
            .send(Command::EvaluateNow { ack })
            .await
            .map_err(|_| ServiceError::Stopped)?;
        reply.await.map_err(|_| ServiceError::Stopped)
    }

    /// Asks the worker to stop. Already-queued commands are dropped.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<ClassifierSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn current_state(&self) -> TrackingState {
        self.snapshots.borrow().state
    }

    pub fn is_gps_available(&self) -> bool {
        self.snapshots.borrow().gps_available
    }

    pub fn step_count(&self) -> Option<u64> {
        self.snapshots.borrow().step_count
    }

    pub fn last_acceleration(&self) -> Option<f64> {
        self.snapshots.borrow().last_acceleration
    }

    pub fn current_trip_id(&self) -> Option<TripId> {
        self.snapshots.borrow().trip_id.clone()
    }

    /// Classifier diagnostics plus the handle's own drop counter.
    pub fn debug_info(&self) -> BTreeMap<String, String> {
        let mut info = self.snapshots.borrow().debug.clone();
        info.insert(
            "dropped_samples".to_string(),
            self.dropped.load(Ordering::Relaxed).to_string(),
        );
        info
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mt_core::{ManualClock, PollingIntervals};

    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn spawn(clock: &ManualClock, options: ServiceOptions) -> TrackerService {
        TrackerService::spawn(ThresholdConfig::default(), Arc::new(clock.clone()), options)
            .unwrap()
    }

    fn manual() -> ServiceOptions {
        ServiceOptions {
            periodic: false,
            ..ServiceOptions::default()
        }
    }

    fn walk_out(handle: &TrackerHandle, at: i64) {
        handle
            .on_location(LocationSample::new(39.9042, 116.4074, 5.0, at))
            .unwrap();
        handle.on_step_count(StepSample::new(0, at)).unwrap();
        handle.on_step_count(StepSample::new(30, at + 1_000)).unwrap();
    }

    #[test]
    fn spawn_outside_runtime_fails() {
        let result = TrackerService::spawn(
            ThresholdConfig::default(),
            Arc::new(ManualClock::new(T0)),
            ServiceOptions::default(),
        );
        assert!(matches!(result, Err(ServiceError::NoRuntime)));
    }

    #[tokio::test]
    async fn spawn_rejects_invalid_config() {
        let config = ThresholdConfig {
            tick_interval_ms: 0,
            ..ThresholdConfig::default()
        };
        let result =
            TrackerService::spawn(config, Arc::new(ManualClock::new(T0)), manual());
        assert!(matches!(result, Err(ServiceError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn samples_are_visible_after_evaluate_now() {
        let clock = ManualClock::new(T0);
        let service = spawn(&clock, manual());
        let handle = service.handle();
        assert_eq!(handle.current_state(), TrackingState::Indoor);
        assert!(!handle.is_gps_available());

        walk_out(&handle, T0);
        handle
            .on_acceleration(AccelerationSample::new(1.1, T0 + 1_000))
            .unwrap();
        clock.set(T0 + 5_000);

        assert_eq!(handle.evaluate_now().await.unwrap(), TrackingState::Outdoor);
        assert_eq!(handle.current_state(), TrackingState::Outdoor);
        assert!(handle.is_gps_available());
        assert_eq!(handle.step_count(), Some(30));
        assert_eq!(handle.last_acceleration(), Some(1.1));
        assert!(handle.current_trip_id().is_some());
        assert_eq!(handle.debug_info()["state"], "outdoor");

        service.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_reload_keeps_previous_config() {
        let clock = ManualClock::new(T0);
        let service = spawn(&clock, manual());
        let handle = service.handle();
        walk_out(&handle, T0);
        clock.set(T0 + 5_000);
        handle.evaluate_now().await.unwrap();

        let bad = ThresholdConfig {
            driving_to_active_speed_threshold_mps: 50.0,
            ..ThresholdConfig::default()
        };
        let err = handle.reload_config(bad).await.unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));

        // Default GPS timeout still applies.
        clock.set(T0 + 30_000);
        assert_eq!(handle.evaluate_now().await.unwrap(), TrackingState::Outdoor);

        let tighter = ThresholdConfig {
            gps_timeout_ms: 10_000,
            polling: PollingIntervals {
                indoor_ms: 5_000,
                deep_stationary_ms: 5_000,
                ..PollingIntervals::default()
            },
            ..ThresholdConfig::default()
        };
        handle.reload_config(tighter).await.unwrap();
        assert_eq!(handle.evaluate_now().await.unwrap(), TrackingState::Indoor);

        service.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_are_broadcast() {
        let clock = ManualClock::new(T0);
        let service = spawn(&clock, manual());
        let handle = service.handle();
        let mut events = handle.subscribe();

        walk_out(&handle, T0);
        clock.set(T0 + 5_000);
        handle.evaluate_now().await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), TrackerEvent::Fix(_)));
        let TrackerEvent::Transition(transition) = events.recv().await.unwrap() else {
            panic!("expected a transition");
        };
        assert_eq!(transition.from, TrackingState::Indoor);
        assert_eq!(transition.to, TrackingState::Outdoor);
        assert_eq!(transition.at_ms, T0 + 5_000);

        let TrackerEvent::Notification { state, text, .. } = events.recv().await.unwrap() else {
            panic!("expected a notification");
        };
        assert_eq!(state, TrackingState::Outdoor);
        assert_eq!(text, TrackingState::Outdoor.notification_text());

        let TrackerEvent::TripStarted { trip_id, at_ms } = events.recv().await.unwrap() else {
            panic!("expected a trip start");
        };
        assert_eq!(at_ms, T0 + 5_000);
        assert_eq!(Some(trip_id), handle.current_trip_id());

        service.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_ticks_drive_the_state() {
        let clock = ManualClock::new(T0);
        let service = spawn(&clock, ServiceOptions::default());
        let handle = service.handle();
        walk_out(&handle, T0);
        clock.set(T0 + 5_000);

        let tick = ThresholdConfig::default().tick_interval_ms;
        tokio::time::sleep(Duration::from_millis(u64::try_from(tick).unwrap() + 1)).await;
        assert_eq!(handle.current_state(), TrackingState::Outdoor);

        service.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reload_rebuilds_the_tick_interval() {
        let clock = ManualClock::new(T0);
        let service = spawn(&clock, ServiceOptions::default());
        let handle = service.handle();

        handle
            .reload_config(ThresholdConfig {
                tick_interval_ms: 1_000,
                ..ThresholdConfig::default()
            })
            .await
            .unwrap();

        // The default 5 s period would not have fired yet.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(handle.debug_info()["ticks"], "1");
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(handle.debug_info()["ticks"], "2");

        service.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_rate_samples_wait_for_the_next_publish() {
        let clock = ManualClock::new(T0);
        let service = spawn(&clock, manual());
        let handle = service.handle();
        let mut snapshots = handle.snapshots.clone();
        snapshots.mark_unchanged();

        handle.on_step_count(StepSample::new(12, T0)).unwrap();
        handle
            .on_acceleration(AccelerationSample::new(0.4, T0))
            .unwrap();
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(!snapshots.has_changed().unwrap());
        assert_eq!(handle.step_count(), None);

        handle
            .on_location(LocationSample::new(39.9042, 116.4074, 5.0, T0))
            .unwrap();
        snapshots.changed().await.unwrap();
        assert_eq!(handle.step_count(), Some(12));
        assert_eq!(handle.last_acceleration(), Some(0.4));

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_drops_samples() {
        let clock = ManualClock::new(T0);
        let service = spawn(
            &clock,
            ServiceOptions {
                command_capacity: 1,
                ..manual()
            },
        );
        let handle = service.handle();

        // The worker has not run yet, so the second sample finds the queue full.
        handle.on_step_count(StepSample::new(1, T0)).unwrap();
        handle.on_step_count(StepSample::new(2, T0)).unwrap();
        assert_eq!(handle.debug_info()["dropped_samples"], "1");

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let clock = ManualClock::new(T0);
        let service = spawn(&clock, manual());
        let handle = service.handle();
        service.shutdown().await.unwrap();

        assert!(matches!(handle.evaluate_now().await, Err(ServiceError::Stopped)));
        assert!(matches!(
            handle.on_location(LocationSample::new(0.0, 0.0, 5.0, T0)),
            Err(ServiceError::Stopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn declared_sensor_shows_in_debug_info() {
        let clock = ManualClock::new(T0);
        let service = spawn(&clock, manual());
        let handle = service.handle();
        handle.declare_unavailable(SensorKind::StepCounter).unwrap();
        handle.evaluate_now().await.unwrap();
        assert_eq!(handle.debug_info()["step_counter.availability"], "unavailable");
        service.shutdown().await.unwrap();
    }
}
