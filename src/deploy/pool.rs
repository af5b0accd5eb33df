//! Fixed-size worker pool for chart deployments
//!
//! Workers are long-lived tokio tasks pulling [`DeployJob`]s off one shared
//! queue. Every job gets exactly one result on its own channel: a deploy
//! result, a cancellation failure, a panic converted into a failure, or a
//! rejection if the pool was not accepting work.
//!
//! # Lifecycle
//!
//! | State | `submit_job` | Workers |
//! |-------|--------------|---------|
//! | Idle | rejected (`PoolNotStarted`) | none |
//! | Open | queued | running |
//! | Closed | rejected (`PoolClosed`) | draining, then exit |
//!
//! `stop` closes intake before waiting on workers, so a submitter racing
//! with shutdown is rejected rather than blocking it.

use crate::deploy::deployer::ChartDeployer;
use crate::deploy::types::{CancelScope, ChartSpec, DeployOptions, DeployResult};
use crate::error::{ChartpilotError, ChartpilotResult};
use crate::lock::OperationLockRegistry;
use chrono::Utc;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One chart's deployment request
#[derive(Debug)]
pub struct DeployJob {
    pub chart: ChartSpec,
    pub options: DeployOptions,
    pub scope: CancelScope,
    result_tx: oneshot::Sender<DeployResult>,
}

impl DeployJob {
    /// Create a job and the receiver its result will arrive on
    pub fn new(
        chart: ChartSpec,
        options: DeployOptions,
        scope: CancelScope,
    ) -> (Self, oneshot::Receiver<DeployResult>) {
        let (result_tx, result_rx) = oneshot::channel();
        let job = Self {
            chart,
            options,
            scope,
            result_tx,
        };
        (job, result_rx)
    }

    fn complete(self, result: DeployResult) {
        // The submitter may have stopped listening; nothing to do then.
        if self.result_tx.send(result).is_err() {
            debug!(chart = %self.chart.name, "result receiver dropped");
        }
    }

    fn reject(self, err: &ChartpilotError) {
        let result =
            DeployResult::failed(&self.chart.name, Utc::now(), Duration::ZERO, err.to_string());
        self.complete(result);
    }
}

enum Intake {
    Idle,
    Open(mpsc::UnboundedSender<DeployJob>),
    Closed,
}

/// Bounded set of deploy workers
pub struct ChartWorkerPool {
    label: String,
    worker_count: usize,
    deployer: Arc<dyn ChartDeployer>,
    locks: Option<OperationLockRegistry>,
    intake: Mutex<Intake>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ChartWorkerPool {
    /// Create a pool of `worker_count` workers (at least one) around `deployer`
    pub fn new(worker_count: usize, deployer: Arc<dyn ChartDeployer>) -> Self {
        Self {
            label: "default".to_string(),
            worker_count: worker_count.max(1),
            deployer,
            locks: None,
            intake: Mutex::new(Intake::Idle),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Name used in log fields
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Run every job while holding its release lock
    pub fn with_locks(mut self, locks: OperationLockRegistry) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether the pool is accepting jobs
    pub fn is_running(&self) -> bool {
        matches!(*self.lock_intake(), Intake::Open(_))
    }

    /// Spawn the workers; later calls are no-ops
    pub fn start(&self) {
        let mut intake = self.lock_intake();
        if !matches!(*intake, Intake::Idle) {
            debug!(pool = %self.label, "start ignored, pool already started");
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for id in 0..self.worker_count {
            let worker = Worker {
                id,
                pool: self.label.clone(),
                deployer: Arc::clone(&self.deployer),
                locks: self.locks.clone(),
            };
            workers.push(tokio::spawn(worker.run(Arc::clone(&rx))));
        }
        *intake = Intake::Open(tx);

        info!(pool = %self.label, workers = self.worker_count, "worker pool started");
    }

    /// Queue a job
    ///
    /// A rejected job still receives a failed result on its channel.
    pub fn submit_job(&self, job: DeployJob) -> ChartpilotResult<()> {
        let intake = self.lock_intake();
        let err = match &*intake {
            Intake::Open(tx) => match tx.send(job) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(job)) => {
                    let err = ChartpilotError::PoolClosed(job.chart.name.clone());
                    job.reject(&err);
                    err
                }
            },
            Intake::Idle => {
                let err = ChartpilotError::PoolNotStarted(job.chart.name.clone());
                job.reject(&err);
                err
            }
            Intake::Closed => {
                let err = ChartpilotError::PoolClosed(job.chart.name.clone());
                job.reject(&err);
                err
            }
        };
        warn!(pool = %self.label, error = %err, "job rejected");
        Err(err)
    }

    /// Close intake, drain queued jobs and wait for every worker to exit
    pub async fn stop(&self) {
        // Dropping the sender ends each worker's recv loop once the queue is empty.
        *self.lock_intake() = Intake::Closed;

        let handles = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(pool = %self.label, error = %e, "worker exited abnormally");
            }
        }

        debug!(pool = %self.label, "worker pool stopped");
    }

    fn lock_intake(&self) -> std::sync::MutexGuard<'_, Intake> {
        self.intake.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Worker {
    id: usize,
    pool: String,
    deployer: Arc<dyn ChartDeployer>,
    locks: Option<OperationLockRegistry>,
}

impl Worker {
    async fn run(self, queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<DeployJob>>>) {
        loop {
            let next = {
                let mut rx = queue.lock().await;
                rx.recv().await
            };
            let Some(job) = next else {
                break;
            };

            debug!(pool = %self.pool, worker = self.id, chart = %job.chart.name, "job picked up");
            let result = self.execute(&job).await;
            job.complete(result);
        }
        debug!(pool = %self.pool, worker = self.id, "worker exiting");
    }

    async fn execute(&self, job: &DeployJob) -> DeployResult {
        let started_at = Utc::now();
        let chart = &job.chart;

        if job.scope.is_cancelled() {
            return DeployResult::cancelled(&chart.name, started_at, job.scope.cause());
        }

        let deploy = AssertUnwindSafe(self.deploy_locked(job)).catch_unwind();
        tokio::select! {
            biased;
            _ = job.scope.token().cancelled() => {
                DeployResult::cancelled(&chart.name, started_at, job.scope.cause())
            }
            outcome = deploy => match outcome {
                Ok(result) => result,
                Err(panic) => {
                    let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();
                    warn!(chart = %chart.name, "deploy function panicked");
                    DeployResult::failed(
                        &chart.name,
                        started_at,
                        elapsed,
                        format!("deploy panicked: {}", panic_message(panic.as_ref())),
                    )
                }
            },
        }
    }

    async fn deploy_locked(&self, job: &DeployJob) -> DeployResult {
        let chart = &job.chart;
        let token = job.scope.token();

        let Some(locks) = &self.locks else {
            return self.deployer.deploy(token, chart, &job.options).await;
        };

        let started_at = Utc::now();
        locks
            .try_run(chart.release_name(), &chart.namespace, "deploy", || async {
                Ok(self.deployer.deploy(token, chart, &job.options).await)
            })
            .await
            .unwrap_or_else(|e| {
                DeployResult::failed(&chart.name, started_at, Duration::ZERO, e.to_string())
            })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
