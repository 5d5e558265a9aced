//! Motion tracker CLI library.
//!
//! This crate provides the CLI interface for the motion tracker: trace
//! replay, live tracking from stdin, and config inspection.

mod cli;
pub mod commands;
mod config;
pub mod trace;

pub use cli::{Cli, Commands};
pub use config::{Config, ServiceSettings};
