//! Read-through cache in front of a chart deployer

use crate::cache::store::DeploymentCache;
use crate::deploy::deployer::ChartDeployer;
use crate::deploy::types::{ChartSpec, DeployOptions, DeployResult};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Duration reported for a result served from the cache
pub const CACHE_HIT_DURATION: Duration = Duration::from_millis(10);

/// Replays cached results instead of redeploying unchanged charts
///
/// Dry runs and forced updates always go to the inner deployer.
pub struct CachingDeployer {
    inner: Arc<dyn ChartDeployer>,
    cache: Arc<DeploymentCache>,
}

impl CachingDeployer {
    pub fn new(inner: Arc<dyn ChartDeployer>, cache: Arc<DeploymentCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl ChartDeployer for CachingDeployer {
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        chart: &ChartSpec,
        options: &DeployOptions,
    ) -> DeployResult {
        if options.dry_run || options.force_update {
            debug!(chart = %chart.name, "cache bypassed");
            return self.inner.deploy(cancel, chart, options).await;
        }

        let key = DeploymentCache::generate_key(chart, options);
        if let Some(entry) = self.cache.get(&key).await {
            info!(chart = %chart.name, key = %key, "deployment served from cache");
            let mut result = entry.result;
            result.started_at = Utc::now();
            result.duration = CACHE_HIT_DURATION;
            result.cached = true;
            return result;
        }

        let result = self.inner.deploy(cancel, chart, options).await;
        self.cache.set(&key, chart, options, &result).await;
        result
    }
}
