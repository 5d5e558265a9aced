use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mt_cli::commands::{config, replay, run};
use mt_cli::{Cli, Commands, Config};
use mt_core::SystemClock;

/// Load config and reject thresholds the classifier would refuse.
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    config
        .thresholds
        .validate()
        .context("invalid threshold configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr; stdout carries command output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut stdout = std::io::stdout().lock();

    match &cli.command {
        Some(Commands::Replay {
            file,
            json,
            tail_ms,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            replay::run(&mut stdout, &config.thresholds, file, *json, *tail_ms)?;
        }
        Some(Commands::Run { fixes }) => {
            let config = load_config(cli.config.as_deref())?;
            let runtime =
                tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            runtime.block_on(run::run(
                stdin,
                &mut stdout,
                &config,
                Arc::new(SystemClock),
                *fixes,
            ))?;
        }
        Some(Commands::Config { json }) => {
            let config = load_config(cli.config.as_deref())?;
            config::run(&mut stdout, &config, *json)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
