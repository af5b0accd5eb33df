//! Deployer that runs an external command per chart
//!
//! The command line is a template of tokens. Placeholders are replaced per
//! chart; a token that renders empty is dropped together with the flag
//! right before it, so `--version {version}` disappears for unversioned
//! charts.
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{release}` | release name |
//! | `{chart}` | chart reference |
//! | `{namespace}` | target namespace |
//! | `{version}` | chart version |
//! | `{environment}` | target environment |
//! | `{image_prefix}` | image registry prefix |
//! | `{tag_base}` | image tag base |
//! | `{values}` | expands to `--set key=value` pairs |

use crate::deploy::deployer::ChartDeployer;
use crate::deploy::types::{CancelCause, ChartSpec, DeployOptions, DeployResult};
use crate::error::{ChartpilotError, ChartpilotResult};
use async_trait::async_trait;
use chrono::Utc;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Max number of output lines kept in a failure message
const ERROR_TAIL_LINES: usize = 20;

/// Runs a templated command for each chart
#[derive(Debug, Clone)]
pub struct CommandDeployer {
    template: Vec<String>,
}

impl CommandDeployer {
    /// Create a deployer from a non-empty token template
    pub fn new(template: Vec<String>) -> ChartpilotResult<Self> {
        if template.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ChartpilotError::invalid_option(
                "command",
                "template must start with a program name",
            ));
        }
        Ok(Self { template })
    }

    /// `helm upgrade --install` template
    pub fn helm() -> Self {
        Self {
            template: default_template(),
        }
    }

    /// Render the argument vector for one chart
    pub fn render(&self, chart: &ChartSpec, options: &DeployOptions) -> Vec<String> {
        let mut args: Vec<String> = Vec::with_capacity(self.template.len() + 2);

        for token in &self.template {
            if token == "{values}" {
                for (key, value) in &options.values {
                    args.push("--set".to_string());
                    args.push(format!("{}={}", key, value));
                }
                continue;
            }

            let rendered = token
                .replace("{release}", chart.release_name())
                .replace("{chart}", &chart.chart)
                .replace("{namespace}", &chart.namespace)
                .replace("{version}", &chart.version)
                .replace("{environment}", &options.environment)
                .replace("{image_prefix}", &options.image_prefix)
                .replace("{tag_base}", &options.tag_base);

            if rendered.is_empty() {
                if args.last().is_some_and(|prev| prev.starts_with('-')) {
                    args.pop();
                }
                continue;
            }
            args.push(rendered);
        }

        if options.dry_run {
            args.push("--dry-run".to_string());
        }
        args
    }
}

/// Default deploy command
pub fn default_template() -> Vec<String> {
    [
        "helm",
        "upgrade",
        "--install",
        "{release}",
        "{chart}",
        "--namespace",
        "{namespace}",
        "--version",
        "{version}",
        "{values}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[async_trait]
impl ChartDeployer for CommandDeployer {
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        chart: &ChartSpec,
        options: &DeployOptions,
    ) -> DeployResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let args = self.render(chart, options);
        let command_line = args.join(" ");

        let Some((program, rest)) = args.split_first() else {
            return DeployResult::failed(&chart.name, started_at, clock.elapsed(), "empty command");
        };

        debug!(chart = %chart.name, command = %command_line, "running deploy command");

        let child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                let err = ChartpilotError::command_failed(command_line, e);
                let elapsed = clock.elapsed();
                return DeployResult::failed(&chart.name, started_at, elapsed, err.to_string());
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                // Dropping the wait future kills the child.
                DeployResult::cancelled(&chart.name, started_at, CancelCause::Cancelled)
            }
            output = child.wait_with_output() => match output {
                Ok(output) if output.status.success() => {
                    DeployResult::success(&chart.name, started_at, clock.elapsed())
                }
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let err = ChartpilotError::CommandExecution {
                        command: command_line,
                        stderr: error_tail(&stdout, &stderr),
                    };
                    DeployResult::failed(&chart.name, started_at, clock.elapsed(), err.to_string())
                }
                Err(e) => {
                    let err = ChartpilotError::command_failed(command_line, e);
                    DeployResult::failed(&chart.name, started_at, clock.elapsed(), err.to_string())
                }
            },
        }
    }
}

/// Last lines of combined output, for failure messages
fn error_tail(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
    lines[start..].join("\n")
}
