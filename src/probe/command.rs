//! Shell command probes

use crate::core::{Host, ProbeOutput};
use crate::probe::ProbeError;
use tokio::process::Command;
use tracing::{debug, warn};

/// Build the process for `cmd` on `host`
///
/// With an empty shell prefix the command runs locally through `sh -c`;
/// otherwise the prefix (e.g. `vagrant ssh <id> -c`) receives the command
/// as its last argument.
pub fn build_command(cmd: &str, host: &Host) -> Command {
    let mut command = match host.shell.split_first() {
        Some((program, args)) => {
            let mut command = Command::new(program);
            command.args(args);
            command
        }
        None => {
            let mut command = Command::new("sh");
            command.arg("-c");
            command
        }
    };
    command.arg(cmd).kill_on_drop(true);
    command
}

/// Run a command and capture stdout; a non-zero exit is an error
///
/// Has no timeout of its own. The caller bounds it, and `kill_on_drop`
/// reaps the child when the future is dropped.
pub async fn run_command(cmd: &str, host: &Host) -> Result<ProbeOutput, ProbeError> {
    debug!("Running on {}: {}", host.id, cmd);

    let output = build_command(cmd, host)
        .output()
        .await
        .map_err(|source| ProbeError::Spawn {
            command: cmd.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);
        warn!("`{}` on {} exited with code {}: {}", cmd, host.id, code, stderr.trim());
        return Err(ProbeError::Exit {
            code,
            stderr: stderr.trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    debug!("`{}` on {} returned {} bytes", cmd, host.id, stdout.len());

    Ok(ProbeOutput {
        status: output.status.code(),
        stdout,
    })
}
