//! Dependency probes

use crate::error::{ChartpilotError, ChartpilotResult};
use crate::monitor::status::CheckKind;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::net::TcpStream;
use tracing::debug;

/// Checks whether a dependency is reachable
///
/// The detector applies its own timeout around `probe`.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Whether this probe knows how to check `name`
    fn supports(&self, _name: &str, _kind: &CheckKind) -> bool {
        true
    }

    async fn probe(&self, name: &str, kind: &CheckKind) -> ChartpilotResult<()>;
}

/// Opens a TCP connection to the configured endpoint
///
/// Endpoints map dependency names to `host:port`; a bare host gets the
/// default port for the dependency's kind.
pub struct TcpProbe {
    endpoints: BTreeMap<String, String>,
}

impl TcpProbe {
    pub fn new(endpoints: BTreeMap<String, String>) -> Self {
        Self { endpoints }
    }

    fn address(&self, name: &str, kind: &CheckKind) -> Option<String> {
        let endpoint = self.endpoints.get(name)?;
        if endpoint.contains(':') {
            return Some(endpoint.clone());
        }
        kind.default_port()
            .map(|port| format!("{}:{}", endpoint, port))
    }
}

#[async_trait]
impl DependencyProbe for TcpProbe {
    fn supports(&self, name: &str, kind: &CheckKind) -> bool {
        self.address(name, kind).is_some()
    }

    async fn probe(&self, name: &str, kind: &CheckKind) -> ChartpilotResult<()> {
        let address = self
            .address(name, kind)
            .ok_or_else(|| ChartpilotError::ProbeFailed {
                dependency: name.to_owned(),
                reason: "no endpoint configured".to_string(),
            })?;

        debug!(dependency = name, %kind, address = %address, "probing dependency");
        TcpStream::connect(&address)
            .await
            .map(drop)
            .map_err(|e| ChartpilotError::ProbeFailed {
                dependency: name.to_owned(),
                reason: format!("{}: {}", address, e),
            })
    }
}
