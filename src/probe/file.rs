//! File existence probes

use crate::core::ProbeOutput;
use crate::probe::ProbeError;

/// Ready when `path` exists and has non-whitespace content
pub async fn check_file(path: &str) -> Result<ProbeOutput, ProbeError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => Err(ProbeError::EmptyFile(path.to_string())),
        Ok(content) => Ok(ProbeOutput {
            status: None,
            stdout: content,
        }),
        Err(source) => Err(ProbeError::Io {
            path: path.to_string(),
            source,
        }),
    }
}
