//! Run command: live tracking from a stream of sensor events.
//!
//! Each input line is a trace event (see [`crate::trace`]). Tracker events
//! are written as JSON lines while input is consumed; at end of input the
//! tracker is evaluated once more and its debug info is printed.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use mt_core::Clock;
use mt_service::{TrackerEvent, TrackerService};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::Config;
use crate::trace::parse_line;

fn write_event<W: Write>(writer: &mut W, event: &TrackerEvent, show_fixes: bool) -> Result<()> {
    if matches!(event, TrackerEvent::Fix(_)) && !show_fixes {
        return Ok(());
    }
    writeln!(writer, "{}", serde_json::to_string(event)?)?;
    Ok(())
}

pub async fn run<R, W>(
    input: R,
    writer: &mut W,
    config: &Config,
    clock: Arc<dyn Clock>,
    show_fixes: bool,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let service = TrackerService::spawn(config.thresholds.clone(), clock, config.service.options())
        .context("failed to start tracker")?;
    let handle = service.handle();
    let mut events = handle.subscribe();
    let mut lines = input.lines();
    let mut line_number = 0_usize;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else { break };
                line_number += 1;
                match parse_line(&line) {
                    Ok(Some(event)) => event.send(&handle).context("tracker stopped unexpectedly")?,
                    Ok(None) => {}
                    Err(e) => tracing::warn!(line = line_number, error = %e, "skipping input line"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => write_event(writer, &event, show_fixes)?,
                Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "output fell behind, events skipped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let state = handle
        .evaluate_now()
        .await
        .context("tracker stopped unexpectedly")?;
    tracing::debug!(%state, "input finished");

    loop {
        match events.try_recv() {
            Ok(event) => write_event(writer, &event, show_fixes)?,
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "output fell behind, events skipped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    writeln!(writer, "{}", serde_json::to_string_pretty(&handle.debug_info())?)?;
    service.shutdown().await.context("tracker did not shut down cleanly")?;
    Ok(())
}
