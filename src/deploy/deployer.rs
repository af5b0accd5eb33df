//! Chart deployer abstraction
//!
//! How a single chart gets deployed is supplied by the caller. The pool,
//! the group deployer and the cache decorator only see this trait.

use crate::deploy::types::{ChartSpec, DeployOptions, DeployResult};
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Deploys one chart
///
/// Implementations must watch `cancel` and return a failed result promptly
/// once it fires. A deployer never returns `Err`: failures are results.
#[async_trait]
pub trait ChartDeployer: Send + Sync {
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        chart: &ChartSpec,
        options: &DeployOptions,
    ) -> DeployResult;
}

/// Adapts an async closure into a [`ChartDeployer`]
pub struct FnDeployer<F> {
    f: F,
}

impl<F> FnDeployer<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(CancellationToken, ChartSpec, DeployOptions) -> Fut + Send + Sync,
        Fut: Future<Output = DeployResult> + Send,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ChartDeployer for FnDeployer<F>
where
    F: Fn(CancellationToken, ChartSpec, DeployOptions) -> Fut + Send + Sync,
    Fut: Future<Output = DeployResult> + Send,
{
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        chart: &ChartSpec,
        options: &DeployOptions,
    ) -> DeployResult {
        (self.f)(cancel.clone(), chart.clone(), options.clone()).await
    }
}
