//! Deployment reports
//!
//! One JSON document per run under `<state_dir>/reports/<id>.json`.
//! Writing a report must never fail the deployment it describes.

use crate::deploy::GroupReport;
use crate::monitor::{DependencyAlert, Insight};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything that happened during one `deploy` run
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub deployment_id: Uuid,
    pub environment: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub groups: Vec<GroupReport>,
    pub insights: Vec<Insight>,
    pub alerts: Vec<DependencyAlert>,
}

impl DeploymentReport {
    pub fn new(environment: &str, dry_run: bool) -> Self {
        Self {
            deployment_id: Uuid::new_v4(),
            environment: environment.to_owned(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            groups: vec![],
            insights: vec![],
            alerts: vec![],
        }
    }

    pub fn push_group(&mut self, group: GroupReport) {
        self.groups.push(group);
    }

    /// Stamp the finish time and attach monitoring output
    pub fn finish(&mut self, insights: Vec<Insight>, alerts: Vec<DependencyAlert>) {
        self.finished_at = Some(Utc::now());
        self.insights = insights;
        self.alerts = alerts;
    }

    pub fn succeeded(&self) -> usize {
        self.groups.iter().map(GroupReport::succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.groups.iter().map(GroupReport::failed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.groups.iter().map(GroupReport::skipped).sum()
    }

    pub fn cached(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.results.iter())
            .filter(|r| r.cached)
            .count()
    }

    /// Every group completed and no chart failed
    pub fn is_success(&self) -> bool {
        self.groups.iter().all(GroupReport::is_success)
    }

    /// Write the report as pretty JSON into `dir`
    ///
    /// Returns the file path, or `None` after logging if anything failed.
    pub async fn write(&self, dir: &Path) -> Option<PathBuf> {
        let path = dir.join(format!("{}.json", self.deployment_id));

        let content = match serde_json::to_string_pretty(self) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to serialize deployment report: {}", e);
                return None;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), "Failed to create reports directory: {}", e);
            return None;
        }
        if let Err(e) = tokio::fs::write(&path, content).await {
            warn!(path = %path.display(), "Failed to write deployment report: {}", e);
            return None;
        }

        debug!(path = %path.display(), "deployment report written");
        Some(path)
    }
}
