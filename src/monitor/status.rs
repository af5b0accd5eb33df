//! Per-dependency health records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::deploy::types::duration_ms;

/// Checks kept per dependency
pub const CHECK_HISTORY_CAPACITY: usize = 100;

/// Error records kept per dependency
pub const ERROR_HISTORY_CAPACITY: usize = 50;

/// Weight of the previous average in the latency EWMA
const LATENCY_DECAY: f64 = 0.8;

/// Health of a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Never checked, or only checked with an unsupported probe
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Failure severity, derived from consecutive failures only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_consecutive(failures: u32) -> Self {
        match failures {
            0..=1 => Self::Low,
            2 => Self::Medium,
            3..=4 => Self::High,
            _ => Self::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Hints this short must match a whole name segment (`orders-db`, not `feedback`)
const SHORT_HINT_LEN: usize = 3;

/// Category of dependency, which selects how it is probed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Database,
    Service,
    Storage,
    Network,
    /// A kind no probe understands; checks record an unknown state
    Unknown(String),
}

const DATABASE_HINTS: &[&str] = &[
    "postgres", "mysql", "maria", "mongo", "redis", "cassandra", "elastic", "sql", "db",
    "database",
];
const STORAGE_HINTS: &[&str] = &["s3", "bucket", "storage", "minio", "gcs", "blob", "volume"];
const NETWORK_HINTS: &[&str] = &["dns", "ingress", "gateway", "proxy", "network", "vpn", "lb"];

impl CheckKind {
    /// Guess the kind from a dependency name; anything unrecognised is a service
    pub fn infer(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let segments: Vec<&str> = name
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|s| !s.is_empty())
            .collect();
        let matches = |hints: &[&str]| {
            hints.iter().any(|h| {
                if h.len() <= SHORT_HINT_LEN {
                    segments.contains(h)
                } else {
                    name.contains(h)
                }
            })
        };

        if matches(DATABASE_HINTS) {
            Self::Database
        } else if matches(STORAGE_HINTS) {
            Self::Storage
        } else if matches(NETWORK_HINTS) {
            Self::Network
        } else {
            Self::Service
        }
    }

    /// Parse an explicit kind name
    pub fn parse(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "database" => Self::Database,
            "service" => Self::Service,
            "storage" => Self::Storage,
            "network" => Self::Network,
            _ => Self::Unknown(kind.to_owned()),
        }
    }

    /// Port assumed when an endpoint omits one
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Database => Some(5432),
            Self::Service => Some(80),
            Self::Storage => Some(443),
            Self::Network => Some(53),
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Service => write!(f, "service"),
            Self::Storage => write!(f, "storage"),
            Self::Network => write!(f, "network"),
            Self::Unknown(kind) => write!(f, "unknown ({})", kind),
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub dependency: String,
    pub kind: CheckKind,
    pub state: HealthState,
    #[serde(with = "duration_ms", rename = "duration_ms")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl DependencyCheck {
    pub fn is_failure(&self) -> bool {
        self.state == HealthState::Unhealthy
    }
}

/// A recorded check failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
}

/// Rolling health record for one dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub kind: CheckKind,
    pub state: HealthState,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub total_checks: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    /// Exponentially weighted check latency
    #[serde(with = "duration_ms", rename = "average_latency_ms")]
    pub average_latency: Duration,
    pub recent_errors: VecDeque<ErrorRecord>,
    pub recent_checks: VecDeque<DependencyCheck>,
}

impl DependencyStatus {
    pub fn new(name: &str, kind: CheckKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            state: HealthState::Unknown,
            last_check: None,
            last_success: None,
            total_checks: 0,
            total_failures: 0,
            consecutive_failures: 0,
            average_latency: Duration::ZERO,
            recent_errors: VecDeque::with_capacity(ERROR_HISTORY_CAPACITY),
            recent_checks: VecDeque::with_capacity(CHECK_HISTORY_CAPACITY),
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::from_consecutive(self.consecutive_failures)
    }

    /// Fold a check into the record
    ///
    /// Checks in the unknown state are kept in history but leave health,
    /// counters and latency untouched.
    pub fn record(&mut self, check: &DependencyCheck) {
        self.last_check = Some(check.checked_at);
        push_bounded(&mut self.recent_checks, check.clone(), CHECK_HISTORY_CAPACITY);

        match check.state {
            HealthState::Unknown => return,
            HealthState::Healthy => {
                self.state = HealthState::Healthy;
                self.consecutive_failures = 0;
                self.last_success = Some(check.checked_at);
            }
            HealthState::Unhealthy => {
                self.state = HealthState::Unhealthy;
                self.total_failures += 1;
                self.consecutive_failures += 1;
                let record = ErrorRecord {
                    at: check.checked_at,
                    message: check
                        .message
                        .clone()
                        .unwrap_or_else(|| "check failed".to_string()),
                    severity: self.severity(),
                };
                push_bounded(&mut self.recent_errors, record, ERROR_HISTORY_CAPACITY);
            }
        }

        self.total_checks += 1;
        self.average_latency = if self.total_checks == 1 {
            check.duration
        } else {
            self.average_latency.mul_f64(LATENCY_DECAY)
                + check.duration.mul_f64(1.0 - LATENCY_DECAY)
        };
    }

    /// Failure fraction over the last `window` conclusive checks
    ///
    /// `None` until at least `min_sample` conclusive checks exist.
    pub fn failure_rate(&self, window: usize, min_sample: usize) -> Option<f64> {
        let recent: Vec<&DependencyCheck> = self
            .recent_checks
            .iter()
            .rev()
            .filter(|c| c.state != HealthState::Unknown)
            .take(window)
            .collect();

        if recent.is_empty() || recent.len() < min_sample {
            return None;
        }
        let failures = recent.iter().filter(|c| c.is_failure()).count();
        Some(failures as f64 / recent.len() as f64)
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    if ring.len() == capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(state: HealthState, millis: u64) -> DependencyCheck {
        DependencyCheck {
            dependency: "postgres-primary".to_string(),
            kind: CheckKind::Database,
            state,
            duration: Duration::from_millis(millis),
            message: (state == HealthState::Unhealthy).then(|| "connection refused".to_string()),
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn severity_boundaries() {
        assert_eq!(Severity::from_consecutive(0), Severity::Low);
        assert_eq!(Severity::from_consecutive(1), Severity::Low);
        assert_eq!(Severity::from_consecutive(2), Severity::Medium);
        assert_eq!(Severity::from_consecutive(3), Severity::High);
        assert_eq!(Severity::from_consecutive(4), Severity::High);
        assert_eq!(Severity::from_consecutive(5), Severity::Critical);
        assert_eq!(Severity::from_consecutive(40), Severity::Critical);
    }

    #[test]
    fn kind_inferred_from_name() {
        assert_eq!(CheckKind::infer("postgres-primary"), CheckKind::Database);
        assert_eq!(CheckKind::infer("Redis-Cache"), CheckKind::Database);
        assert_eq!(CheckKind::infer("assets-bucket"), CheckKind::Storage);
        assert_eq!(CheckKind::infer("edge-ingress"), CheckKind::Network);
        assert_eq!(CheckKind::infer("payments-api"), CheckKind::Service);
    }

    #[test]
    fn short_hints_match_whole_segments() {
        assert_eq!(CheckKind::infer("orders-db"), CheckKind::Database);
        assert_eq!(CheckKind::infer("public_lb"), CheckKind::Network);
        assert_eq!(CheckKind::infer("feedback-api"), CheckKind::Service);
        assert_eq!(CheckKind::infer("bulb-service"), CheckKind::Service);
        // Longer hints still match inside a segment.
        assert_eq!(CheckKind::infer("mysql8"), CheckKind::Database);
    }

    #[test]
    fn explicit_kind_parsing() {
        assert_eq!(CheckKind::parse("Storage"), CheckKind::Storage);
        assert_eq!(
            CheckKind::parse("queue"),
            CheckKind::Unknown("queue".to_string())
        );
        assert_eq!(CheckKind::parse("queue").default_port(), None);
    }

    #[test]
    fn failures_then_success_resets_consecutive() {
        let mut status = DependencyStatus::new("postgres-primary", CheckKind::Database);
        assert_eq!(status.state, HealthState::Unknown);

        for _ in 0..3 {
            status.record(&check(HealthState::Unhealthy, 100));
        }
        assert_eq!(status.state, HealthState::Unhealthy);
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(status.severity(), Severity::High);
        assert_eq!(status.recent_errors.len(), 3);
        assert_eq!(status.recent_errors[1].severity, Severity::Medium);

        status.record(&check(HealthState::Healthy, 100));
        assert_eq!(status.state, HealthState::Healthy);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.total_failures, 3);
        assert_eq!(status.total_checks, 4);
        assert!(status.last_success.is_some());
    }

    #[test]
    fn latency_is_exponentially_weighted() {
        let mut status = DependencyStatus::new("api", CheckKind::Service);
        status.record(&check(HealthState::Healthy, 100));
        assert_eq!(status.average_latency, Duration::from_millis(100));

        status.record(&check(HealthState::Healthy, 600));
        // 0.8 * 100 + 0.2 * 600
        let ms = status.average_latency.as_secs_f64() * 1000.0;
        assert!((ms - 200.0).abs() < 0.01, "got {ms}");
    }

    #[test]
    fn unknown_checks_do_not_touch_counters() {
        let mut status = DependencyStatus::new("queue", CheckKind::Unknown("queue".into()));
        status.record(&check(HealthState::Unknown, 0));

        assert_eq!(status.state, HealthState::Unknown);
        assert_eq!(status.total_checks, 0);
        assert_eq!(status.recent_checks.len(), 1);
        assert!(status.last_check.is_some());
    }

    #[test]
    fn rings_are_bounded() {
        let mut status = DependencyStatus::new("api", CheckKind::Service);
        for _ in 0..(CHECK_HISTORY_CAPACITY + 20) {
            status.record(&check(HealthState::Unhealthy, 1));
        }
        assert_eq!(status.recent_checks.len(), CHECK_HISTORY_CAPACITY);
        assert_eq!(status.recent_errors.len(), ERROR_HISTORY_CAPACITY);
        assert_eq!(status.total_failures, (CHECK_HISTORY_CAPACITY + 20) as u64);
    }

    #[test]
    fn failure_rate_over_window() {
        let mut status = DependencyStatus::new("api", CheckKind::Service);
        for _ in 0..30 {
            status.record(&check(HealthState::Unhealthy, 1));
        }
        for _ in 0..15 {
            status.record(&check(HealthState::Healthy, 1));
        }
        // Last 20: 5 failures, 15 successes.
        assert_eq!(status.failure_rate(20, 5), Some(0.25));

        let fresh = DependencyStatus::new("api", CheckKind::Service);
        assert_eq!(fresh.failure_rate(20, 5), None);
    }
}
