//! Chart deployment pipeline
//!
//! - [`ChartDeployer`]: how one chart gets deployed (caller supplied)
//! - [`ChartWorkerPool`]: fixed set of workers running deploy jobs
//! - [`ParallelChartDeployer`]: fans a chart group out over a pool
//! - [`CommandDeployer`]: runs a templated command such as `helm upgrade`

pub mod command;
pub mod deployer;
pub mod parallel;
pub mod plan;
pub mod pool;
pub mod types;

pub use command::CommandDeployer;
pub use deployer::{ChartDeployer, FnDeployer};
pub use parallel::{GroupReport, ParallelChartDeployer};
pub use plan::{DeployPlan, GroupPlan};
pub use pool::{ChartWorkerPool, DeployJob};
pub use types::{CancelCause, CancelScope, ChartSpec, DeployOptions, DeployResult, DeployStatus};
