//! Network probes: TCP port and HTTP health checks

use crate::core::ProbeOutput;
use crate::probe::ProbeError;
use std::time::Duration;
use tokio::net::TcpStream;

/// Ready when a TCP connection to `addr` (`host:port`) succeeds
pub async fn check_port(addr: &str) -> Result<ProbeOutput, ProbeError> {
    TcpStream::connect(addr)
        .await
        .map_err(|e| ProbeError::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
    Ok(ProbeOutput {
        status: None,
        stdout: String::new(),
    })
}

/// Ready when a GET on `url` answers with a 2xx status
///
/// `timeout` is the one the client was built with; it is only used to
/// report a timed-out request.
pub async fn check_http(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<ProbeOutput, ProbeError> {
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Http(format!("request to {} failed: {}", url, e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Http(format!("{} returned {}", url, status)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ProbeError::Http(format!("failed to read body from {}: {}", url, e)))?;

    Ok(ProbeOutput {
        status: Some(i32::from(status.as_u16())),
        stdout: body,
    })
}
