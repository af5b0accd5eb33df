//! Dependency failure detector
//!
//! Keeps a map of chart to declared dependencies and a health record per
//! dependency. Checks run on demand or from a background loop. Alerts are
//! logged and kept for reports; they never affect a deployment.

use crate::config::MonitorConfig;
use crate::monitor::insight::Insight;
use crate::monitor::probe::DependencyProbe;
use crate::monitor::status::{CheckKind, DependencyCheck, DependencyStatus, HealthState, Severity};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Alerts kept by the detector
pub const ALERT_HISTORY_CAPACITY: usize = 100;

/// Checks considered by the failure rate alert
pub const FAILURE_RATE_WINDOW: usize = 20;

/// Fewest checks before a failure rate is meaningful
pub const MIN_RATE_SAMPLE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConsecutiveFailures,
    HighLatency,
    FailureRate,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConsecutiveFailures => write!(f, "consecutive failures"),
            Self::HighLatency => write!(f, "high latency"),
            Self::FailureRate => write!(f, "failure rate"),
        }
    }
}

/// A threshold crossing on one dependency
#[derive(Debug, Clone, Serialize)]
pub struct DependencyAlert {
    pub dependency: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
}

#[derive(Default)]
struct DetectorState {
    /// Chart to the dependencies it declared
    graph: BTreeMap<String, Vec<String>>,
    statuses: BTreeMap<String, DependencyStatus>,
    alerts: VecDeque<DependencyAlert>,
}

/// Values an alert is evaluated against, taken before and after a check
struct Snapshot {
    consecutive: u32,
    latency: Duration,
    failure_rate: Option<f64>,
}

impl Snapshot {
    fn of(status: &DependencyStatus) -> Self {
        Self {
            consecutive: status.consecutive_failures,
            latency: status.average_latency,
            failure_rate: status.failure_rate(FAILURE_RATE_WINDOW, MIN_RATE_SAMPLE),
        }
    }
}

/// Watches declared dependencies and raises alerts on threshold crossings
pub struct DependencyFailureDetector {
    settings: MonitorConfig,
    probe: Arc<dyn DependencyProbe>,
    state: RwLock<DetectorState>,
}

impl DependencyFailureDetector {
    pub fn new(settings: MonitorConfig, probe: Arc<dyn DependencyProbe>) -> Self {
        Self {
            settings,
            probe,
            state: RwLock::new(DetectorState::default()),
        }
    }

    /// Replace `chart`'s dependency list, seeding records for new names
    pub async fn register_dependency(&self, chart: &str, dependencies: &[String]) {
        let mut state = self.state.write().await;
        for name in dependencies {
            state
                .statuses
                .entry(name.clone())
                .or_insert_with(|| DependencyStatus::new(name, CheckKind::infer(name)));
        }
        state.graph.insert(chart.to_owned(), dependencies.to_vec());
        debug!(chart, dependencies = dependencies.len(), "registered dependencies");
    }

    /// Run one check and fold it into the dependency's record
    ///
    /// The kind is inferred from the name when not given. Probe errors and
    /// timeouts are recorded as an unhealthy check, never returned.
    pub async fn check_dependency(&self, name: &str, kind: Option<CheckKind>) -> DependencyCheck {
        let kind = match kind {
            Some(kind) => kind,
            None => self.known_kind(name).await,
        };
        let check = self.run_probe(name, kind).await;

        let alerts = {
            let mut state = self.state.write().await;
            let status = state
                .statuses
                .entry(name.to_owned())
                .or_insert_with(|| DependencyStatus::new(name, check.kind.clone()));

            let before = Snapshot::of(status);
            status.record(&check);
            let alerts = self.evaluate(status, &before);

            for alert in &alerts {
                if state.alerts.len() == ALERT_HISTORY_CAPACITY {
                    state.alerts.pop_front();
                }
                state.alerts.push_back(alert.clone());
            }
            alerts
        };

        for alert in &alerts {
            warn!(
                dependency = %alert.dependency,
                alert = %alert.kind,
                severity = %alert.severity,
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            );
        }
        check
    }

    /// Check every known dependency concurrently
    pub async fn check_all(&self) -> Vec<DependencyCheck> {
        let targets: Vec<(String, CheckKind)> = {
            let state = self.state.read().await;
            state
                .statuses
                .values()
                .map(|s| (s.name.clone(), s.kind.clone()))
                .collect()
        };

        join_all(
            targets
                .into_iter()
                .map(|(name, kind)| async move { self.check_dependency(&name, Some(kind)).await }),
        )
        .await
    }

    /// Check all dependencies on the configured interval until `cancel` fires
    ///
    /// The first round runs immediately.
    pub fn start_monitoring(
        self: &Arc<Self>,
        cancel: CancellationToken,
        deployment_id: String,
    ) -> JoinHandle<()> {
        let detector = Arc::clone(self);
        let period = self.settings.interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                deployment_id = %deployment_id,
                interval_secs = period.as_secs(),
                "dependency monitoring started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Abandon a round in flight when cancelled.
                        let checks = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            checks = detector.check_all() => checks,
                        };
                        let failed = checks.iter().filter(|c| c.is_failure()).count();
                        debug!(
                            deployment_id = %deployment_id,
                            checked = checks.len(),
                            failed,
                            "dependency check round complete"
                        );
                    }
                }
            }

            info!(deployment_id = %deployment_id, "dependency monitoring stopped");
        })
    }

    /// Insights for every current problem, empty when all is well
    pub async fn get_dependency_insights(&self) -> Vec<Insight> {
        let statuses = self.statuses().await;
        let unhealthy: Vec<DependencyStatus> = statuses
            .iter()
            .filter(|s| s.state == HealthState::Unhealthy)
            .cloned()
            .collect();

        let dependents = {
            let state = self.state.read().await;
            let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (chart, deps) in &state.graph {
                for dep in deps {
                    dependents.entry(dep.clone()).or_default().push(chart.clone());
                }
            }
            dependents
        };

        Insight::unhealthy_dependencies(&unhealthy, &dependents)
            .into_iter()
            .chain(Insight::slow_dependencies(
                &statuses,
                self.settings.latency_ceiling(),
            ))
            .collect()
    }

    pub async fn alerts(&self) -> Vec<DependencyAlert> {
        self.state.read().await.alerts.iter().cloned().collect()
    }

    pub async fn graph(&self) -> BTreeMap<String, Vec<String>> {
        self.state.read().await.graph.clone()
    }

    pub async fn status(&self, name: &str) -> Option<DependencyStatus> {
        self.state.read().await.statuses.get(name).cloned()
    }

    pub async fn statuses(&self) -> Vec<DependencyStatus> {
        self.state.read().await.statuses.values().cloned().collect()
    }

    /// Recent checks for `name`, oldest first
    pub async fn check_history(&self, name: &str) -> Vec<DependencyCheck> {
        self.state
            .read()
            .await
            .statuses
            .get(name)
            .map(|s| s.recent_checks.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Charts that declared `name` as a dependency
    pub async fn dependents_of(&self, name: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .graph
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == name))
            .map(|(chart, _)| chart.clone())
            .collect()
    }

    async fn known_kind(&self, name: &str) -> CheckKind {
        self.state
            .read()
            .await
            .statuses
            .get(name)
            .map(|s| s.kind.clone())
            .unwrap_or_else(|| CheckKind::infer(name))
    }

    async fn run_probe(&self, name: &str, kind: CheckKind) -> DependencyCheck {
        let checked_at = Utc::now();
        let started = Instant::now();

        let (state, message) = if let CheckKind::Unknown(raw) = &kind {
            (HealthState::Unknown, Some(format!("no probe for check kind \"{}\"", raw)))
        } else if !self.probe.supports(name, &kind) {
            (
                HealthState::Unknown,
                Some(format!("no {} probe configured for {}", kind, name)),
            )
        } else {
            let timeout = self.settings.probe_timeout();
            match tokio::time::timeout(timeout, self.probe.probe(name, &kind)).await {
                Ok(Ok(())) => (HealthState::Healthy, None),
                Ok(Err(e)) => (HealthState::Unhealthy, Some(e.to_string())),
                Err(_) => (
                    HealthState::Unhealthy,
                    Some(format!("check timed out after {}s", timeout.as_secs())),
                ),
            }
        };

        DependencyCheck {
            dependency: name.to_owned(),
            kind,
            state,
            duration: started.elapsed(),
            message,
            checked_at,
        }
    }

    /// Alerts for thresholds crossed by the latest check
    fn evaluate(&self, status: &DependencyStatus, before: &Snapshot) -> Vec<DependencyAlert> {
        let after = Snapshot::of(status);
        let mut alerts = Vec::new();
        let mut raise = |kind, message: String, value: f64, threshold: f64| {
            alerts.push(DependencyAlert {
                dependency: status.name.clone(),
                kind,
                severity: status.severity(),
                message,
                value,
                threshold,
                raised_at: Utc::now(),
            })
        };

        let threshold = self.settings.consecutive_failure_threshold;
        if before.consecutive < threshold && after.consecutive >= threshold {
            raise(
                AlertKind::ConsecutiveFailures,
                format!(
                    "dependency {} failed {} consecutive checks",
                    status.name, after.consecutive
                ),
                after.consecutive as f64,
                threshold as f64,
            );
        }

        let ceiling = self.settings.latency_ceiling();
        if before.latency <= ceiling && after.latency > ceiling {
            raise(
                AlertKind::HighLatency,
                format!(
                    "dependency {} average latency {}ms exceeds {}ms",
                    status.name,
                    after.latency.as_millis(),
                    ceiling.as_millis()
                ),
                after.latency.as_millis() as f64,
                ceiling.as_millis() as f64,
            );
        }

        let limit = self.settings.failure_rate_threshold;
        let was_above = before.failure_rate.is_some_and(|r| r > limit);
        if let Some(rate) = after.failure_rate.filter(|r| *r > limit) {
            if !was_above {
                raise(
                    AlertKind::FailureRate,
                    format!(
                        "dependency {} failed {:.0}% of its last {} checks",
                        status.name,
                        rate * 100.0,
                        FAILURE_RATE_WINDOW
                    ),
                    rate,
                    limit,
                );
            }
        }

        alerts
    }
}
