//! CLI subcommand implementations.

pub mod config;
pub mod replay;
pub mod run;
