//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Motion/context tracker.
///
/// Classifies GPS, step-counter and accelerometer input into indoor, outdoor,
/// active, driving and deep-stationary modes, and groups movement into trips.
#[derive(Debug, Parser)]
#[command(name = "mt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Replay a recorded sensor trace through the classifier.
    ///
    /// The trace is JSON lines, one sensor event per line, e.g.
    /// `{"type":"location","latitude":39.9,"longitude":116.4,"accuracy_meters":5,"timestamp_ms":0}`.
    Replay {
        /// Trace file to replay.
        file: PathBuf,

        /// Output as JSON.
        #[arg(long)]
        json: bool,

        /// Keep ticking this many milliseconds after the last event.
        #[arg(long, default_value_t = 0)]
        tail_ms: u64,
    },

    /// Track live: read sensor events from stdin and print tracker events.
    Run {
        /// Also print every accepted GPS fix.
        #[arg(long)]
        fixes: bool,
    },

    /// Show the effective configuration.
    Config {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}
