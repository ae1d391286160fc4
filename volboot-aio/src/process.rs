// volboot-aio/src/process.rs
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Output as StdOutput;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, error};
use volboot_common::error::{BootError, Result};

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs an external command from an argument vector and captures its output.
/// No shell is involved.
pub async fn run_command_async(
    command: &str,
    args: &[String],
    cwd: Option<PathBuf>,
    envs: Option<HashMap<String, String>>,
) -> Result<StdOutput> {
    debug!(
        "Running command: {} {:?} (cwd: {:?}, envs: {:?})",
        command,
        args,
        cwd,
        envs.as_ref().map(|e| e.keys().collect::<Vec<_>>())
    );

    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd.kill_on_drop(true);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    if let Some(env_map) = envs {
        cmd.envs(env_map);
    }

    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    match cmd.output().await {
        Ok(output) => {
            if !output.status.success() {
                debug!("Command failed with status: {}", output.status);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.trim().is_empty() {
                    debug!("Stdout:\n{}", stdout.trim());
                }
                if !stderr.trim().is_empty() {
                    debug!("Stderr:\n{}", stderr.trim());
                }
            } else {
                debug!("Command finished successfully.");
            }
            Ok(output)
        }
        Err(e) => {
            error!("Failed to execute command {}: {}", command, e);
            Err(BootError::Io(Arc::new(e)))
        }
    }
}

/// Like [`run_command_async`] but a non-zero exit is an error carrying the
/// tail of stderr.
pub async fn run_checked(
    command: &str,
    args: &[String],
    cwd: Option<PathBuf>,
    envs: Option<HashMap<String, String>>,
) -> Result<StdOutput> {
    let output = run_command_async(command, args, cwd, envs).await?;
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    Err(BootError::CommandExecError(format!(
        "{} {} exited with {}: {}",
        command,
        args.join(" "),
        output.status,
        tail
    )))
}
