//! Chartpilot CLI entry point

use chartpilot::cli::{Cli, Commands};
use chartpilot::config::ConfigManager;
use chartpilot::error::{ChartpilotError, ChartpilotResult};
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ChartpilotResult<()> {
    let cli = Cli::parse();

    // An explicit path must exist, except for `config` which can create it
    if let Some(ref path) = cli.config {
        if !path.exists() && !matches!(cli.command, Commands::Config(_)) {
            return Err(ChartpilotError::ConfigNotFound(path.clone()));
        }
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);

    match cli.command {
        Commands::Deploy(args) => chartpilot::cli::commands::deploy(args, &config).await,
        Commands::Cache(args) => chartpilot::cli::commands::cache(args, &config).await,
        Commands::Deps(args) => chartpilot::cli::commands::deps(args, &config).await,
        Commands::Config(args) => {
            chartpilot::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set
fn init_logging(verbose: u8, format: &str) {
    let default = match verbose {
        0 => "chartpilot=warn",
        1 => "chartpilot=info",
        _ => "chartpilot=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
