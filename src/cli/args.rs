//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Chartpilot - parallel chart deployment orchestrator
///
/// Deploys groups of charts concurrently with per-release locking, result
/// caching and dependency health monitoring.
#[derive(Parser, Debug)]
#[command(name = "chartpilot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CHARTPILOT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the charts in a plan file
    Deploy(DeployArgs),

    /// Inspect or clean the deployment result cache
    Cache(CacheArgs),

    /// Check the health of the dependencies a plan declares
    Deps(DepsArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the deploy command
#[derive(Parser, Debug)]
pub struct DeployArgs {
    /// Plan file (TOML)
    pub plan: PathBuf,

    /// Only deploy these groups (repeatable)
    #[arg(short, long = "group")]
    pub groups: Vec<String>,

    /// Render and validate without changing the cluster
    #[arg(long)]
    pub dry_run: bool,

    /// Deploy even when a cached result exists
    #[arg(long)]
    pub force: bool,

    /// Disable the result cache for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Disable background dependency monitoring
    #[arg(long)]
    pub no_monitor: bool,

    /// Continue with later groups after a group has failures
    #[arg(long)]
    pub keep_going: bool,

    /// Override deploy.max_concurrency
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Override deploy.group_timeout_secs (0 disables)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip writing the JSON report
    #[arg(long)]
    pub no_report: bool,

    /// Output format for the summary
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry counts, directory and TTL
    Stats {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove expired entries
    Prune,

    /// Remove every entry and the cache directory
    Clear,
}

/// Arguments for the deps command
#[derive(Parser, Debug)]
pub struct DepsArgs {
    #[command(subcommand)]
    pub action: DepsAction,
}

#[derive(Subcommand, Debug)]
pub enum DepsAction {
    /// Run one check round over every dependency in a plan
    Check {
        /// Plan file (TOML)
        plan: PathBuf,

        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
