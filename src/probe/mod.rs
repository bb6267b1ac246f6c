//! Probe execution against target hosts

pub mod command;
pub mod error;
pub mod file;
pub mod network;

use crate::core::{Host, Probe, ProbeKind, ProbeOutput};
use async_trait::async_trait;
use std::time::Duration;

pub use error::ProbeError;

/// Trait for probe execution - allows for different implementations
///
/// Implementations must not retry or sleep; the stage executor owns the
/// retry loop and bounds every call with the attempt timeout.
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// Run one probe against a host
    async fn execute(&self, probe: &Probe, host: &Host) -> Result<ProbeOutput, ProbeError>;

    /// Run a raw command on a host (join commands, cleanup)
    async fn run_command(&self, cmd: &str, host: &Host) -> Result<ProbeOutput, ProbeError> {
        self.execute(&Probe::command(cmd), host).await
    }
}

/// Probe executor backed by local processes, TCP sockets and HTTP
#[derive(Debug, Clone)]
pub struct ShellProbeExecutor {
    http: reqwest::Client,
    http_timeout: Duration,
}

impl ShellProbeExecutor {
    pub fn new() -> Result<Self, ProbeError> {
        Self::with_http_timeout(Duration::from_secs(30))
    }

    /// Fails when the HTTP client (TLS backend included) cannot be built
    pub fn with_http_timeout(timeout: Duration) -> Result<Self, ProbeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProbeError::HttpClient)?;
        Ok(Self {
            http,
            http_timeout: timeout,
        })
    }
}

#[async_trait]
impl ProbeExecutor for ShellProbeExecutor {
    async fn execute(&self, probe: &Probe, host: &Host) -> Result<ProbeOutput, ProbeError> {
        match probe.kind {
            ProbeKind::Command => command::run_command(&probe.spec, host).await,
            ProbeKind::FileExists => file::check_file(&probe.spec).await,
            ProbeKind::HttpCheck => network::check_http(&self.http, &probe.spec, self.http_timeout).await,
            ProbeKind::PortOpen => network::check_port(&probe.spec).await,
        }
    }
}
