//! Insights summarising dependency trouble for deployment reports

use crate::monitor::status::{CheckKind, DependencyStatus, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    UnhealthyDependencies,
    SlowDependencies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => Self::Low,
            Severity::Medium => Self::Medium,
            Severity::High => Self::High,
            Severity::Critical => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
}

/// A suggested fix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    pub action: String,
    pub effort: Effort,
    pub priority: Priority,
    pub impact: Impact,
}

/// A detected condition with suggested remediation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    pub metrics: BTreeMap<String, f64>,
    pub affected: Vec<String>,
    pub remediation: Vec<Remediation>,
    pub generated_at: DateTime<Utc>,
}

impl Insight {
    /// Summarise every unhealthy dependency, or `None` when all are fine
    ///
    /// `dependents` maps a dependency to the charts that declared it.
    pub fn unhealthy_dependencies(
        unhealthy: &[DependencyStatus],
        dependents: &BTreeMap<String, Vec<String>>,
    ) -> Option<Self> {
        if unhealthy.is_empty() {
            return None;
        }

        let worst = unhealthy
            .iter()
            .map(DependencyStatus::severity)
            .max()
            .unwrap_or(Severity::Low);
        let affected: Vec<String> = unhealthy.iter().map(|s| s.name.clone()).collect();

        let description = unhealthy
            .iter()
            .map(|s| {
                let last_error = s
                    .recent_errors
                    .back()
                    .map(|e| e.message.as_str())
                    .unwrap_or("no error recorded");
                format!(
                    "{} ({}) failed {} consecutive checks, severity {}: {}",
                    s.name,
                    s.kind,
                    s.consecutive_failures,
                    s.severity(),
                    last_error
                )
            })
            .collect::<Vec<_>>()
            .join("; ");

        let mut metrics = BTreeMap::new();
        metrics.insert("unhealthy_count".to_string(), unhealthy.len() as f64);
        metrics.insert(
            "max_consecutive_failures".to_string(),
            unhealthy
                .iter()
                .map(|s| s.consecutive_failures)
                .max()
                .unwrap_or(0) as f64,
        );
        metrics.insert(
            "total_failures".to_string(),
            unhealthy.iter().map(|s| s.total_failures).sum::<u64>() as f64,
        );

        let mut remediation: Vec<Remediation> = unhealthy
            .iter()
            .map(|s| Remediation {
                action: format!("{}: {}", s.name, kind_action(&s.kind)),
                effort: Effort::Medium,
                priority: s.severity().into(),
                impact: Impact::High,
            })
            .collect();

        let mut blocked: Vec<&str> = affected
            .iter()
            .filter_map(|name| dependents.get(name))
            .flatten()
            .map(String::as_str)
            .collect();
        blocked.sort_unstable();
        blocked.dedup();
        if !blocked.is_empty() {
            remediation.push(Remediation {
                action: format!(
                    "Hold rollouts of dependent charts until recovered: {}",
                    blocked.join(", ")
                ),
                effort: Effort::Low,
                priority: worst.into(),
                impact: Impact::Medium,
            });
        }

        Some(Self {
            kind: InsightKind::UnhealthyDependencies,
            title: format!("{} unhealthy dependencies", unhealthy.len()),
            description,
            metrics,
            affected,
            remediation,
            generated_at: Utc::now(),
        })
    }

    /// Summarise dependencies whose average latency is above `ceiling`
    pub fn slow_dependencies(statuses: &[DependencyStatus], ceiling: Duration) -> Option<Self> {
        let slow: Vec<&DependencyStatus> = statuses
            .iter()
            .filter(|s| s.total_checks > 0 && s.average_latency > ceiling)
            .collect();
        if slow.is_empty() {
            return None;
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("latency_ceiling_ms".to_string(), ceiling.as_millis() as f64);
        for s in &slow {
            metrics.insert(
                format!("{}.average_latency_ms", s.name),
                s.average_latency.as_millis() as f64,
            );
        }

        Some(Self {
            kind: InsightKind::SlowDependencies,
            title: format!("{} slow dependencies", slow.len()),
            description: slow
                .iter()
                .map(|s| format!("{} averages {}ms", s.name, s.average_latency.as_millis()))
                .collect::<Vec<_>>()
                .join("; "),
            metrics,
            affected: slow.iter().map(|s| s.name.clone()).collect(),
            remediation: vec![Remediation {
                action: "Check resource saturation and network path to the slow dependencies"
                    .to_string(),
                effort: Effort::Medium,
                priority: Priority::Medium,
                impact: Impact::Medium,
            }],
            generated_at: Utc::now(),
        })
    }
}

fn kind_action(kind: &CheckKind) -> &'static str {
    match kind {
        CheckKind::Database => "check database availability, credentials and connection limits",
        CheckKind::Service => "check the service's pods and recent rollouts",
        CheckKind::Storage => "check bucket or volume availability and access policy",
        CheckKind::Network => "check DNS resolution, ingress and network policy",
        CheckKind::Unknown(_) => "configure a supported check kind for this dependency",
    }
}
