//! The task that owns the classifier.

use std::sync::Arc;
use std::time::Duration;

use mt_core::{
    AccelerationSample, ClassifierSnapshot, Clock, ConfigError, LocationSample, SensorKind,
    StateClassifier, StepSample, ThresholdConfig, TrackingState,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::event::TrackerEvent;

/// Work queued for the worker. Each command is applied whole before the next.
#[derive(Debug)]
pub enum Command {
    Location(LocationSample),
    Acceleration(AccelerationSample),
    Steps(StepSample),
    DeclareUnavailable(SensorKind),
    ReloadConfig {
        config: ThresholdConfig,
        ack: oneshot::Sender<Result<(), ConfigError>>,
    },
    EvaluateNow {
        ack: oneshot::Sender<TrackingState>,
    },
}

impl Command {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Location(_) => "location",
            Self::Acceleration(_) => "acceleration",
            Self::Steps(_) => "steps",
            Self::DeclareUnavailable(_) => "declare_unavailable",
            Self::ReloadConfig { .. } => "reload_config",
            Self::EvaluateNow { .. } => "evaluate_now",
        }
    }
}

fn tick_interval(period_ms: i64) -> Interval {
    let period = Duration::from_millis(u64::try_from(period_ms).unwrap_or(1).max(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

pub struct Worker {
    pub classifier: StateClassifier,
    pub clock: Arc<dyn Clock>,
    pub commands: mpsc::Receiver<Command>,
    pub shutdown: watch::Receiver<bool>,
    pub snapshots: watch::Sender<Arc<ClassifierSnapshot>>,
    pub events: broadcast::Sender<TrackerEvent>,
    pub periodic: bool,
}

impl Worker {
    pub async fn run(mut self) {
        let mut ticker = tick_interval(self.classifier.config().tick_interval_ms);
        tracing::info!(
            tick_interval_ms = self.classifier.config().tick_interval_ms,
            periodic = self.periodic,
            "tracker started"
        );

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    let period = self.classifier.config().tick_interval_ms;
                    self.apply(command);
                    if self.classifier.config().tick_interval_ms != period {
                        ticker = tick_interval(self.classifier.config().tick_interval_ms);
                    }
                }
                _ = ticker.tick(), if self.periodic => {
                    self.tick();
                    self.publish_snapshot();
                }
            }
        }

        tracing::info!("tracker stopped");
    }

    /// Applies one command.
    ///
    /// Accelerometer and step samples arrive at sensor rate and only reach the
    /// snapshot at the next tick or fix.
    fn apply(&mut self, command: Command) {
        tracing::trace!(command = command.kind(), "applying command");
        match command {
            Command::Location(sample) => {
                if let Ok(fix) = self.classifier.on_location(sample) {
                    self.emit(TrackerEvent::Fix(fix));
                    self.publish_snapshot();
                }
            }
            // Rejections are already logged and counted by the sampler.
            Command::Acceleration(sample) => {
                if let Err(error) = self.classifier.on_acceleration(sample) {
                    tracing::trace!(%error, "acceleration sample not applied");
                }
            }
            Command::Steps(sample) => {
                if let Err(error) = self.classifier.on_step_count(sample) {
                    tracing::trace!(%error, "step sample not applied");
                }
            }
            Command::DeclareUnavailable(sensor) => {
                self.classifier.declare_unavailable(sensor);
                self.publish_snapshot();
            }
            Command::ReloadConfig { config, ack } => {
                let result = self.classifier.replace_config(config);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "rejected config reload, keeping previous");
                }
                self.publish_snapshot();
                let _ = ack.send(result);
            }
            Command::EvaluateNow { ack } => {
                let state = self.tick();
                // Callers read the snapshot as soon as the ack lands.
                self.publish_snapshot();
                let _ = ack.send(state);
            }
        }
    }

    fn tick(&mut self) -> TrackingState {
        let now_ms = self.clock.now_ms();
        let outcome = self.classifier.tick(now_ms);

        if let Some(transition) = outcome.transition {
            self.emit(TrackerEvent::Transition(transition));
            self.emit(TrackerEvent::Notification {
                state: transition.to,
                text: transition.to.notification_text(),
                poll_interval_ms: self.classifier.poll_interval_ms(),
            });
        }
        if let Some(trip_id) = outcome.trip_started {
            self.emit(TrackerEvent::TripStarted {
                trip_id,
                at_ms: now_ms,
            });
        }
        if let Some(trip) = outcome.trip_ended {
            self.emit(TrackerEvent::TripEnded(trip));
        }
        outcome.state
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_snapshot(&self) {
        let snapshot = self.classifier.snapshot(self.clock.now_ms());
        self.snapshots.send_replace(Arc::new(snapshot));
    }
}
