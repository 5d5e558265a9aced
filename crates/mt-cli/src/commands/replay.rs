//! Replay command: drives the classifier through a recorded trace.
//!
//! This module implements `mt replay`, the sensor simulator. Time comes from
//! a manual clock that jumps from event to event, with a tick every
//! `tick_interval_ms` in between, so a replay is deterministic and runs as
//! fast as the trace can be read.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result, ensure};
use mt_core::{
    Clock, ManualClock, StateClassifier, ThresholdConfig, TickOutcome, TrackingState, Transition,
    TripSession,
};
use serde::Serialize;

use crate::trace::{TraceEvent, parse_trace};

/// Upper bound on ticks between two consecutive events.
///
/// A trace mixing boot-relative and epoch timestamps would otherwise spin
/// through hundreds of millions of ticks.
const MAX_TICKS_PER_GAP: i64 = 1_000_000;

/// What happened during a replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub start_ms: i64,
    pub end_ms: i64,
    pub events: usize,
    pub rejected: usize,
    pub ticks: u64,
    pub transitions: Vec<Transition>,
    /// Most recent finished trips, oldest first, then the trip still open at the end.
    pub trips: Vec<TripSession>,
    pub final_state: TrackingState,
}

impl ReplayReport {
    fn record(&mut self, outcome: TickOutcome) {
        self.ticks += 1;
        self.transitions.extend(outcome.transition);
    }
}

struct Replayer {
    clock: ManualClock,
    classifier: StateClassifier,
    tick_interval_ms: i64,
    next_tick_ms: i64,
    report: ReplayReport,
}

impl Replayer {
    /// Runs every tick due at or before `until_ms`.
    fn tick_until(&mut self, until_ms: i64) -> Result<()> {
        if until_ms >= self.next_tick_ms {
            let gap_ms = until_ms
                .checked_sub(self.next_tick_ms)
                .context("timestamp gap overflows")?;
            let due = gap_ms / self.tick_interval_ms + 1;
            ensure!(
                due <= MAX_TICKS_PER_GAP,
                "gap of {gap_ms} ms before {until_ms} needs {due} ticks (limit {MAX_TICKS_PER_GAP}); \
                 are all timestamps on the same clock?"
            );
        }
        while self.next_tick_ms <= until_ms {
            self.clock.set(self.next_tick_ms);
            let outcome = self.classifier.tick(self.clock.now_ms());
            self.report.record(outcome);
            self.next_tick_ms = self
                .next_tick_ms
                .checked_add(self.tick_interval_ms)
                .context("tick time overflows")?;
        }
        Ok(())
    }
}

/// Replays `events` in order and collects the transitions and trips.
///
/// `tail_ms` keeps the clock running past the last event so pending
/// timeouts (GPS loss, trip end) can fire.
pub fn replay(events: &[TraceEvent], config: &ThresholdConfig, tail_ms: i64) -> Result<ReplayReport> {
    let start_ms = events.first().map_or(0, TraceEvent::timestamp_ms);
    let classifier =
        StateClassifier::new(config.clone(), start_ms).context("invalid threshold configuration")?;

    let next_tick_ms = start_ms
        .checked_add(config.tick_interval_ms)
        .with_context(|| format!("first tick after {start_ms} overflows"))?;

    let mut replayer = Replayer {
        clock: ManualClock::new(start_ms),
        classifier,
        tick_interval_ms: config.tick_interval_ms,
        next_tick_ms,
        report: ReplayReport {
            start_ms,
            end_ms: start_ms,
            events: events.len(),
            rejected: 0,
            ticks: 0,
            transitions: Vec::new(),
            trips: Vec::new(),
            final_state: TrackingState::default(),
        },
    };

    for event in events {
        let at_ms = event.timestamp_ms();
        replayer.tick_until(at_ms)?;
        if at_ms > replayer.clock.now_ms() {
            replayer.clock.set(at_ms);
        }
        if event.apply(&mut replayer.classifier).is_err() {
            replayer.report.rejected += 1;
        }
    }

    let end_ms = replayer
        .clock
        .now_ms()
        .checked_add(tail_ms)
        .context("--tail-ms runs past the end of time")?;
    replayer.tick_until(end_ms)?;

    let trips = replayer.classifier.trips();
    let mut report = replayer.report;
    report.end_ms = end_ms;
    report.final_state = replayer.classifier.current_state();
    report.trips = trips.recent_trips().chain(trips.current()).cloned().collect();
    Ok(report)
}

/// Formats a millisecond offset as `H:MM:SS`.
pub fn format_offset(ms: i64) -> String {
    let total = ms.max(0) / 1_000;
    format!("{}:{:02}:{:02}", total / 3_600, total / 60 % 60, total % 60)
}

/// Writes the human-readable summary.
pub fn render<W: Write>(writer: &mut W, report: &ReplayReport) -> Result<()> {
    let offset = |at_ms: i64| format_offset(at_ms - report.start_ms);

    writeln!(
        writer,
        "Replayed {} events over {} ({} rejected, {} ticks)",
        report.events,
        offset(report.end_ms),
        report.rejected,
        report.ticks
    )?;

    writeln!(writer)?;
    writeln!(writer, "TRANSITIONS")?;
    if report.transitions.is_empty() {
        writeln!(writer, "  (none)")?;
    }
    for t in &report.transitions {
        writeln!(
            writer,
            "  {}  {} -> {} ({})",
            offset(t.at_ms),
            t.from,
            t.to,
            t.reason
        )?;
    }

    writeln!(writer)?;
    writeln!(writer, "TRIPS")?;
    if report.trips.is_empty() {
        writeln!(writer, "  (none)")?;
    }
    for trip in &report.trips {
        let end = trip.end_time_ms.map_or_else(|| "active".to_string(), offset);
        writeln!(
            writer,
            "  {}  {} .. {}  {}  {:.1} m  {} fixes",
            trip.trip_id,
            offset(trip.start_time_ms),
            end,
            format_offset(trip.duration_ms(report.end_ms)),
            trip.distance_meters,
            trip.fix_count
        )?;
    }

    writeln!(writer)?;
    writeln!(writer, "Final state: {}", report.final_state)?;
    Ok(())
}

pub fn run<W: Write>(
    writer: &mut W,
    config: &ThresholdConfig,
    path: &Path,
    json: bool,
    tail_ms: u64,
) -> Result<()> {
    let tail_ms = i64::try_from(tail_ms).context("--tail-ms is too large")?;
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let events = parse_trace(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))?;
    tracing::debug!(events = events.len(), "loaded trace");

    let report = replay(&events, config, tail_ms)?;
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        render(writer, &report)?;
    }
    Ok(())
}
