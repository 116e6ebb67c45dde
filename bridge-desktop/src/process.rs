//! Command Runner Implementation using tokio::process

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    process::{CommandOutput, CommandRunner},
};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs external tools as child processes
///
/// The child is killed if the future is dropped, so a cancelled conversion
/// never leaves an orphaned `ffmpeg` behind.
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(program, args = ?args, "Running external command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    BridgeError::NotAvailable(format!("{} is not installed or not on PATH", program))
                }
                _ => BridgeError::Io(e),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
