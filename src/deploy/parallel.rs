//! Parallel deployment of a chart group
//!
//! Fans a group of independent charts out over a [`ChartWorkerPool`] and
//! gathers exactly one result per chart. A failing chart never stops its
//! siblings. The group as a whole only errors when it was cancelled or ran
//! past its timeout, and even then every chart is accounted for.

use crate::config::DeployConfig;
use crate::deploy::deployer::ChartDeployer;
use crate::deploy::pool::{ChartWorkerPool, DeployJob};
use crate::deploy::types::{
    duration_ms, CancelCause, CancelScope, ChartSpec, DeployOptions, DeployResult, DeployStatus,
};
use crate::error::{ChartpilotError, ChartpilotResult};
use crate::lock::OperationLockRegistry;
use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long in-flight jobs get to report after the group is interrupted
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Results for one deployed group
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group: String,
    /// One entry per requested chart, in completion order
    pub results: Vec<DeployResult>,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Set when the group was cancelled or timed out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<CancelCause>,
}

impl GroupReport {
    fn empty(group: &str) -> Self {
        Self {
            group: group.to_owned(),
            results: vec![],
            started_at: Utc::now(),
            duration: Duration::ZERO,
            cancelled: None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.count(DeployStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(DeployStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(DeployStatus::Skipped)
    }

    /// No chart failed and the group ran to completion
    pub fn is_success(&self) -> bool {
        self.cancelled.is_none() && self.failed() == 0
    }

    /// Group-level error, present only for cancellation or timeout
    pub fn error(&self) -> Option<ChartpilotError> {
        self.cancelled.map(|cause| ChartpilotError::GroupCancelled {
            group: self.group.clone(),
            cause,
        })
    }

    /// Result for a chart by name
    pub fn result_for(&self, chart: &str) -> Option<&DeployResult> {
        self.results.iter().find(|r| r.chart == chart)
    }

    fn count(&self, status: DeployStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Deploys chart groups with bounded concurrency
#[derive(Debug, Clone)]
pub struct ParallelChartDeployer {
    max_concurrency: usize,
    group_timeout: Option<Duration>,
    locks: Option<OperationLockRegistry>,
}

impl ParallelChartDeployer {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            group_timeout: None,
            locks: None,
        }
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        Self::new(config.max_concurrency).with_timeout(config.group_timeout())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.group_timeout = timeout;
        self
    }

    /// Hold each chart's release lock while it deploys
    pub fn with_locks(mut self, locks: OperationLockRegistry) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Deploy `charts` on a pool scoped to this call
    ///
    /// The pool is sized to `min(max_concurrency, charts.len())` and torn
    /// down before returning. Returns `Err` only for an invalid group, before
    /// any chart starts.
    pub async fn deploy_group(
        &self,
        cancel: &CancellationToken,
        group: &str,
        charts: &[ChartSpec],
        options: &DeployOptions,
        deployer: Arc<dyn ChartDeployer>,
    ) -> ChartpilotResult<GroupReport> {
        validate_group(group, charts)?;
        if charts.is_empty() {
            return Ok(GroupReport::empty(group));
        }

        let workers = self.max_concurrency.min(charts.len());
        let mut pool = ChartWorkerPool::new(workers, deployer).with_label(group);
        if let Some(locks) = &self.locks {
            pool = pool.with_locks(locks.clone());
        }
        pool.start();

        let report = self.run(&pool, cancel, group, charts, options).await;
        pool.stop().await;
        Ok(report)
    }

    /// Deploy `charts` on a pool the caller owns and has started
    pub async fn deploy_group_on(
        &self,
        pool: &ChartWorkerPool,
        cancel: &CancellationToken,
        group: &str,
        charts: &[ChartSpec],
        options: &DeployOptions,
    ) -> ChartpilotResult<GroupReport> {
        validate_group(group, charts)?;
        if charts.is_empty() {
            return Ok(GroupReport::empty(group));
        }
        Ok(self.run(pool, cancel, group, charts, options).await)
    }

    async fn run(
        &self,
        pool: &ChartWorkerPool,
        cancel: &CancellationToken,
        group: &str,
        charts: &[ChartSpec],
        options: &DeployOptions,
    ) -> GroupReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let scope = CancelScope::child_of(cancel);

        info!(group, charts = charts.len(), "deploying group");

        let mut outstanding: HashSet<String> = HashSet::with_capacity(charts.len());
        let mut pending = FuturesUnordered::new();
        for chart in charts {
            let (job, rx) = DeployJob::new(chart.clone(), options.clone(), scope.clone());
            // A rejected job still resolves `rx` with a failed result.
            let _ = pool.submit_job(job);
            outstanding.insert(chart.name.clone());
            let name = chart.name.clone();
            pending.push(async move { (name, rx.await) });
        }

        let mut results = Vec::with_capacity(charts.len());
        let mut interrupted: Option<CancelCause> = None;

        let deadline = async {
            match self.group_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        while interrupted.is_none() {
            tokio::select! {
                next = pending.next() => match next {
                    Some((name, received)) => {
                        outstanding.remove(&name);
                        results.push(received.unwrap_or_else(|_| {
                            let elapsed = clock.elapsed();
                            let reason = "result channel closed";
                            DeployResult::failed(&name, started_at, elapsed, reason)
                        }));
                    }
                    None => break,
                },
                _ = scope.token().cancelled() => {
                    let cause = scope.cause();
                    scope.cancel(cause);
                    interrupted = Some(cause);
                }
                _ = &mut deadline => {
                    let cause = CancelCause::timed_out(self.group_timeout.unwrap_or_default());
                    scope.cancel(cause);
                    interrupted = Some(cause);
                }
            }
        }

        if let Some(cause) = interrupted {
            warn!(group, cause = %cause, outstanding = outstanding.len(), "group interrupted");

            // Workers see the cancelled scope and answer quickly; give them a bounded window.
            let drain = async {
                while let Some((name, received)) = pending.next().await {
                    outstanding.remove(&name);
                    results.push(
                        received
                            .unwrap_or_else(|_| DeployResult::cancelled(&name, started_at, cause)),
                    );
                }
            };
            if tokio::time::timeout(CANCEL_GRACE, drain).await.is_err() {
                warn!(group, "charts did not report within grace period");
            }
            drop(pending);

            for name in outstanding.drain() {
                results.push(DeployResult::cancelled(&name, started_at, cause));
            }
        }

        let report = GroupReport {
            group: group.to_owned(),
            results,
            started_at,
            duration: clock.elapsed(),
            cancelled: interrupted,
        };
        info!(
            group,
            succeeded = report.succeeded(),
            failed = report.failed(),
            duration_ms = report.duration.as_millis() as u64,
            "group finished"
        );
        report
    }
}

/// Reject a group whose charts cannot all be deployed side by side
///
/// Names must be unique so results can be matched to charts, and each
/// release/namespace pair must be unique so no two charts contend for the
/// same operation lock.
pub(crate) fn validate_group(group: &str, charts: &[ChartSpec]) -> ChartpilotResult<()> {
    if group.trim().is_empty() {
        return Err(ChartpilotError::invalid_option("group", "name must not be empty"));
    }

    let mut seen = HashSet::new();
    let mut releases = HashSet::new();
    for chart in charts {
        if chart.name.trim().is_empty() {
            return Err(ChartpilotError::invalid_option(
                format!("group {}", group),
                "chart name must not be empty",
            ));
        }
        if chart.namespace.trim().is_empty() {
            return Err(ChartpilotError::invalid_option(
                format!("group {}", group),
                format!("chart {} has no namespace", chart.name),
            ));
        }
        if !seen.insert(chart.name.as_str()) {
            return Err(ChartpilotError::invalid_option(
                format!("group {}", group),
                format!("chart {} listed twice", chart.name),
            ));
        }
        if !releases.insert((chart.release_name(), chart.namespace.as_str())) {
            return Err(ChartpilotError::invalid_option(
                format!("group {}", group),
                format!(
                    "release {}/{} is deployed by more than one chart",
                    chart.namespace,
                    chart.release_name()
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::deployer::FnDeployer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn charts(n: usize) -> Vec<ChartSpec> {
        (0..n)
            .map(|i| ChartSpec::new(&format!("svc-{i}"), "1.0.0", "apps"))
            .collect()
    }

    /// Fails charts whose name ends in an odd digit
    fn odd_fails() -> Arc<dyn ChartDeployer> {
        Arc::new(FnDeployer::new(|_cancel, chart, _opts| async move {
            let odd = chart
                .name
                .chars()
                .last()
                .and_then(|c| c.to_digit(10))
                .is_some_and(|d| d % 2 == 1);
            if odd {
                DeployResult::failed(&chart.name, Utc::now(), Duration::ZERO, "install failed")
            } else {
                DeployResult::success(&chart.name, Utc::now(), Duration::ZERO)
            }
        }))
    }

    /// Honors cancellation, otherwise sleeps `delay`
    fn sleeper(delay: Duration, started: Arc<AtomicUsize>) -> Arc<dyn ChartDeployer> {
        Arc::new(FnDeployer::new(move |cancel, chart, _opts| {
            let started = Arc::clone(&started);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                let begin = Utc::now();
                tokio::select! {
                    _ = cancel.cancelled() => {
                        DeployResult::cancelled(&chart.name, begin, CancelCause::Cancelled)
                    }
                    _ = tokio::time::sleep(delay) => {
                        DeployResult::success(&chart.name, begin, delay)
                    }
                }
            }
        }))
    }

    #[tokio::test]
    async fn one_result_per_chart_with_mixed_outcomes() {
        let deployer = ParallelChartDeployer::new(3);
        let report = deployer
            .deploy_group(
                &CancellationToken::new(),
                "backend",
                &charts(7),
                &DeployOptions::default(),
                odd_fails(),
            )
            .await
            .unwrap();

        assert_eq!(report.results.len(), 7);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 3);
        assert!(report.error().is_none());
        assert!(!report.is_success());
        assert_eq!(
            report.result_for("svc-3").unwrap().error.as_deref(),
            Some("install failed")
        );
    }

    #[tokio::test]
    async fn empty_group_returns_no_results() {
        let report = ParallelChartDeployer::new(2)
            .deploy_group(
                &CancellationToken::new(),
                "noop",
                &[],
                &DeployOptions::default(),
                odd_fails(),
            )
            .await
            .unwrap();

        assert!(report.results.is_empty());
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn rejects_invalid_groups_before_deploying() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut dupes = charts(2);
        dupes[1].name = dupes[0].name.clone();

        let err = ParallelChartDeployer::new(2)
            .deploy_group(
                &CancellationToken::new(),
                "backend",
                &dupes,
                &DeployOptions::default(),
                sleeper(Duration::ZERO, Arc::clone(&started)),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("listed twice"));
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_shared_release_before_deploying() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut shared = vec![
            ChartSpec::new("orders-a", "1.0.0", "shop"),
            ChartSpec::new("orders-b", "1.0.0", "shop"),
        ];
        for chart in &mut shared {
            chart.release = Some("orders".to_string());
        }

        let err = ParallelChartDeployer::new(2)
            .with_locks(OperationLockRegistry::new())
            .deploy_group(
                &CancellationToken::new(),
                "data",
                &shared,
                &DeployOptions::default(),
                sleeper(Duration::ZERO, Arc::clone(&started)),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("release shop/orders"));
        assert_eq!(started.load(Ordering::SeqCst), 0);

        // Same release in another namespace is a different lock.
        shared[1].namespace = "shop-canary".to_string();
        assert!(validate_group("data", &shared).is_ok());
    }

    #[tokio::test]
    async fn parent_cancellation_accounts_for_every_chart() {
        let started = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let report = ParallelChartDeployer::new(2)
            .deploy_group(
                &cancel,
                "frontend",
                &charts(6),
                &DeployOptions::default(),
                sleeper(Duration::from_secs(60), Arc::clone(&started)),
            )
            .await
            .unwrap();

        assert_eq!(report.results.len(), 6);
        assert_eq!(report.failed(), 6);
        assert_eq!(report.cancelled, Some(CancelCause::Cancelled));
        assert!(report.error().unwrap().is_cancellation());
        // Only the first two ever reached the deploy function.
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.error.as_deref() == Some("deployment was cancelled")));
    }

    #[tokio::test]
    async fn timeout_marks_remaining_charts() {
        let started = Arc::new(AtomicUsize::new(0));
        let report = ParallelChartDeployer::new(1)
            .with_timeout(Some(Duration::from_millis(50)))
            .deploy_group(
                &CancellationToken::new(),
                "slow",
                &charts(3),
                &DeployOptions::default(),
                sleeper(Duration::from_secs(60), started),
            )
            .await
            .unwrap();

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.cancelled, Some(CancelCause::TimedOut { after_ms: 50 }));
        let queued = report.result_for("svc-2").unwrap();
        assert_eq!(queued.error.as_deref(), Some("deployment timed out after 50ms"));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let deployer: Arc<dyn ChartDeployer> = {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            Arc::new(FnDeployer::new(move |_cancel, chart, _opts| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    DeployResult::success(&chart.name, Utc::now(), Duration::from_millis(10))
                }
            }))
        };

        let report = ParallelChartDeployer::new(3)
            .deploy_group(
                &CancellationToken::new(),
                "wide",
                &charts(12),
                &DeployOptions::default(),
                deployer,
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn runs_on_caller_owned_pool() {
        let pool = ChartWorkerPool::new(2, odd_fails());
        pool.start();

        let deployer = ParallelChartDeployer::new(2);
        let first = deployer
            .deploy_group_on(
                &pool,
                &CancellationToken::new(),
                "a",
                &charts(2),
                &DeployOptions::default(),
            )
            .await
            .unwrap();
        let second = deployer
            .deploy_group_on(
                &pool,
                &CancellationToken::new(),
                "b",
                &charts(4),
                &DeployOptions::default(),
            )
            .await
            .unwrap();
        pool.stop().await;

        assert_eq!(first.results.len(), 2);
        assert_eq!(second.results.len(), 4);
    }
}
