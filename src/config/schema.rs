//! Configuration schema for Chartpilot
//!
//! Configuration is stored at `~/.config/chartpilot/config.toml`

use crate::error::{ChartpilotError, ChartpilotResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Parallel deployment settings
    pub deploy: DeployConfig,

    /// Deployment result cache settings
    pub cache: CacheConfig,

    /// Dependency health monitoring settings
    pub monitor: MonitorConfig,
}

impl Config {
    /// Validate option ranges before any concurrent work starts
    pub fn validate(&self) -> ChartpilotResult<()> {
        self.general.validate()?;
        self.deploy.validate()?;
        self.cache.validate()?;
        self.monitor.validate()
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Write a JSON deployment report after each run
    pub write_report: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            write_report: true,
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> ChartpilotResult<()> {
        match self.log_format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(ChartpilotError::invalid_option(
                "general.log_format",
                format!("expected \"text\" or \"json\", got \"{}\"", other),
            )),
        }
    }
}

/// Parallel deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Upper bound on charts deployed at once within a group
    pub max_concurrency: usize,

    /// Per-group timeout in seconds (0 = no timeout)
    pub group_timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            group_timeout_secs: 900,
        }
    }
}

impl DeployConfig {
    /// Group timeout, `None` when disabled
    pub fn group_timeout(&self) -> Option<Duration> {
        (self.group_timeout_secs > 0).then(|| Duration::from_secs(self.group_timeout_secs))
    }

    fn validate(&self) -> ChartpilotResult<()> {
        if self.max_concurrency == 0 {
            return Err(ChartpilotError::invalid_option(
                "deploy.max_concurrency",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Deployment result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable result caching (default: true)
    pub enabled: bool,

    /// Cache directory (defaults to the state directory)
    pub dir: Option<PathBuf>,

    /// Entry lifetime in seconds
    pub ttl_secs: u64,

    /// Only results at or below this duration are cached
    pub max_cacheable_duration_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            ttl_secs: 3600,
            max_cacheable_duration_ms: 5000,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Significance threshold for caching a result
    pub fn max_cacheable_duration(&self) -> Duration {
        Duration::from_millis(self.max_cacheable_duration_ms)
    }

    fn validate(&self) -> ChartpilotResult<()> {
        if self.ttl_secs == 0 {
            return Err(ChartpilotError::invalid_option(
                "cache.ttl_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Dependency health monitoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Run the background monitor during deployments
    pub enabled: bool,

    /// Seconds between check rounds
    pub interval_secs: u64,

    /// Consecutive failures that raise an alert
    pub consecutive_failure_threshold: u32,

    /// Average latency ceiling in milliseconds
    pub latency_ceiling_ms: u64,

    /// Failure fraction over the recent window that raises an alert
    pub failure_rate_threshold: f64,

    /// Per-probe timeout in seconds, longer than the latency ceiling
    pub probe_timeout_secs: u64,

    /// Dependency name to `host:port`
    pub endpoints: BTreeMap<String, String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            consecutive_failure_threshold: 3,
            latency_ceiling_ms: 30_000,
            failure_rate_threshold: 0.2,
            probe_timeout_secs: 60,
            endpoints: BTreeMap::new(),
        }
    }
}

impl MonitorConfig {
    /// Interval between check rounds
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Average latency above which an alert is raised
    pub fn latency_ceiling(&self) -> Duration {
        Duration::from_millis(self.latency_ceiling_ms)
    }

    /// Timeout for a single probe
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    fn validate(&self) -> ChartpilotResult<()> {
        if self.interval_secs == 0 {
            return Err(ChartpilotError::invalid_option(
                "monitor.interval_secs",
                "must be greater than zero",
            ));
        }
        if self.consecutive_failure_threshold == 0 {
            return Err(ChartpilotError::invalid_option(
                "monitor.consecutive_failure_threshold",
                "must be at least 1",
            ));
        }
        if self.latency_ceiling_ms == 0 {
            return Err(ChartpilotError::invalid_option(
                "monitor.latency_ceiling_ms",
                "must be greater than zero",
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ChartpilotError::invalid_option(
                "monitor.probe_timeout_secs",
                "must be greater than zero",
            ));
        }
        // A probe cut off before the ceiling can never push latency above it.
        if self.probe_timeout() <= self.latency_ceiling() {
            return Err(ChartpilotError::invalid_option(
                "monitor.probe_timeout_secs",
                format!(
                    "must exceed monitor.latency_ceiling_ms ({}ms)",
                    self.latency_ceiling_ms
                ),
            ));
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(ChartpilotError::invalid_option(
                "monitor.failure_rate_threshold",
                "must be within (0, 1]",
            ));
        }
        Ok(())
    }
}
