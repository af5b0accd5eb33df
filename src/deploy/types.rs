//! Chart, option and result records shared by the deploy pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A deployable chart targeted at one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSpec {
    /// Chart name, also the default release name
    pub name: String,

    /// Chart reference passed to the deploy command (path or repo/name)
    #[serde(default)]
    pub chart: String,

    /// Chart version
    #[serde(default)]
    pub version: String,

    /// Target namespace
    pub namespace: String,

    /// Release name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    /// External dependencies this chart needs at runtime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl ChartSpec {
    /// Create a chart whose reference equals its name
    pub fn new(name: &str, version: &str, namespace: &str) -> Self {
        Self {
            name: name.to_owned(),
            chart: name.to_owned(),
            version: version.to_owned(),
            namespace: namespace.to_owned(),
            release: None,
            dependencies: vec![],
        }
    }

    /// Release name used for locking and the deploy command
    pub fn release_name(&self) -> &str {
        self.release.as_deref().unwrap_or(&self.name)
    }
}

/// Effective options for one deployment run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployOptions {
    /// Target environment (production, staging, ...)
    pub environment: String,

    /// Registry prefix for images
    pub image_prefix: String,

    /// Base tag applied to images
    pub tag_base: String,

    /// Extra chart values
    pub values: BTreeMap<String, String>,

    /// Render without applying
    pub dry_run: bool,

    /// Redeploy even if nothing changed
    pub force_update: bool,
}

/// Terminal status of a chart deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Why a group or job stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CancelCause {
    Cancelled,
    TimedOut { after_ms: u64 },
}

impl CancelCause {
    pub fn timed_out(after: Duration) -> Self {
        Self::TimedOut {
            after_ms: after.as_millis() as u64,
        }
    }
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "was cancelled"),
            Self::TimedOut { after_ms } if after_ms % 1000 == 0 => {
                write!(f, "timed out after {}s", after_ms / 1000)
            }
            Self::TimedOut { after_ms } => write!(f, "timed out after {}ms", after_ms),
        }
    }
}

/// Cancellation token that remembers why it fired
///
/// Clones share both the token and the recorded cause. The first cause
/// recorded wins.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
}

impl CancelScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope cancelled whenever `parent` is
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            cause: Arc::new(OnceLock::new()),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Record `cause` and fire the token
    pub fn cancel(&self, cause: CancelCause) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The recorded cause; a parent cancellation records none and reads as `Cancelled`
    pub fn cause(&self) -> CancelCause {
        self.cause.get().copied().unwrap_or(CancelCause::Cancelled)
    }
}

/// Outcome of deploying one chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployResult {
    /// Chart name
    pub chart: String,

    /// Terminal status
    pub status: DeployStatus,

    /// Wall time spent deploying
    #[serde(with = "duration_ms")]
    pub duration: Duration,

    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the deployment started
    pub started_at: DateTime<Utc>,

    /// Served from the result cache
    #[serde(default)]
    pub cached: bool,
}

impl DeployResult {
    pub fn success(chart: &str, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            chart: chart.to_owned(),
            status: DeployStatus::Success,
            duration,
            error: None,
            started_at,
            cached: false,
        }
    }

    pub fn failed(
        chart: &str,
        started_at: DateTime<Utc>,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            chart: chart.to_owned(),
            status: DeployStatus::Failed,
            duration,
            error: Some(error.into()),
            started_at,
            cached: false,
        }
    }

    pub fn skipped(chart: &str, reason: impl Into<String>) -> Self {
        Self {
            chart: chart.to_owned(),
            status: DeployStatus::Skipped,
            duration: Duration::ZERO,
            error: Some(reason.into()),
            started_at: Utc::now(),
            cached: false,
        }
    }

    /// Failed result for a chart stopped by cancellation before or while running
    pub fn cancelled(chart: &str, started_at: DateTime<Utc>, cause: CancelCause) -> Self {
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();
        Self::failed(chart, started_at, elapsed, format!("deployment {}", cause))
    }

    pub fn is_success(&self) -> bool {
        self.status == DeployStatus::Success
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
