//! External Command Abstraction
//!
//! Converters shell out to tools such as `ffmpeg`, `pdftotext`, `pandoc` and
//! `xlsx2csv`. Going through [`CommandRunner`] keeps those converters testable
//! without the tools installed.

use async_trait::async_trait;

use crate::error::Result;

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last non-empty stderr line, for error messages
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string()
    }
}

/// Runs external programs to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotAvailable`](crate::BridgeError::NotAvailable) when
    /// the program cannot be spawned. A non-zero exit is not an error here.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail() {
        let output = CommandOutput::failure(1, "frame=1\nInvalid data found\n\n");
        assert!(!output.is_success());
        assert_eq!(output.stderr_tail(), "Invalid data found");
    }
}
