//! Probe error types

use std::time::Duration;
use thiserror::Error;

/// Why a single probe invocation did not succeed
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("exited with code {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("HTTP check failed: {0}")]
    Http(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file {0} is empty")]
    EmptyFile(String),
}
