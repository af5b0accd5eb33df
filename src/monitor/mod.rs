//! Dependency health monitoring
//!
//! Each dependency moves `unknown -> healthy <-> unhealthy`. Severity comes
//! from the consecutive failure count alone:
//!
//! | Consecutive failures | Severity |
//! |----------------------|----------|
//! | 0-1 | low |
//! | 2 | medium |
//! | 3-4 | high |
//! | 5+ | critical |

pub mod detector;
pub mod insight;
pub mod probe;
pub mod status;

pub use detector::{AlertKind, DependencyAlert, DependencyFailureDetector};
pub use insight::{Effort, Impact, Insight, InsightKind, Priority, Remediation};
pub use probe::{DependencyProbe, TcpProbe};
pub use status::{CheckKind, DependencyCheck, DependencyStatus, HealthState, Severity};
