//! Deployment result cache
//!
//! Results are keyed by a SHA-256 fingerprint of chart identity and the
//! options that affect what gets deployed. Repeating an unchanged deploy
//! replays the stored result instead of touching the cluster.
//!
//! # Caching Rules
//!
//! | Request | Behaviour |
//! |---------|-----------|
//! | dry run / forced update | always deploys, cache untouched |
//! | hit (unexpired) | stored result replayed |
//! | miss, fast success | deploys, result stored |
//! | miss, slow or failed | deploys, nothing stored |

pub mod cached;
pub mod store;

pub use cached::{CachingDeployer, CACHE_HIT_DURATION};
pub use store::{CacheEntry, CachePolicy, CacheStats, DeploymentCache};
