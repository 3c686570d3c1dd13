//! Remote Command Port
//!
//! One-shot command execution on an authenticated transport, used by the
//! SFTP permission cache, the home directory probe and the metadata probe.

use async_trait::async_trait;

/// Outcome of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Transport-level failure (channel, timeout), if any.
    pub error: Option<String>,
}

impl ExecResult {
    /// No transport error and exit code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }

    /// Stdout of a successful run, empty otherwise.
    #[must_use]
    pub fn unwrap_stdout(self) -> String {
        if self.success() {
            self.stdout
        } else {
            String::new()
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Trait for running commands on a remote host
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion with the runner's default timeout.
    async fn run(&self, command: &str) -> ExecResult;
}
