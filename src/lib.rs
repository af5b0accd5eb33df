//! Chartpilot - parallel chart deployment orchestrator
//!
//! Deploys groups of charts concurrently while never running two operations
//! on the same release at once, replays unchanged deployments from a result
//! cache and watches declared dependencies in the background.

pub mod cache;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod lock;
pub mod monitor;
pub mod report;
pub mod ui;

pub use error::{ChartpilotError, ChartpilotResult};
