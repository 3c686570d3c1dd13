//! Remote command runner over an authenticated SSH transport

use std::time::Duration;

use async_trait::async_trait;
use russh::ChannelMsg;
use russh::client::Msg;
use tokio::time::timeout;
use tracing::debug;

use super::client::SshClient;
use crate::ports::{CommandRunner, ExecResult};

/// Collect stdout, stderr and the exit status of one exec channel.
async fn read_command_output(
    channel: &mut russh::Channel<Msg>,
    limit: Duration,
) -> Option<(Vec<u8>, Vec<u8>, Option<u32>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;

    let collected = timeout(limit, async {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                None => break,
                // ExitStatus may arrive after Eof; keep reading until the
                // channel is gone
                _ => {}
            }
        }
    })
    .await;

    collected.ok().map(|()| (stdout, stderr, exit_code))
}

impl SshClient {
    /// Run `command` in its own channel, giving up after `limit`.
    pub async fn exec_with_timeout(&self, command: &str, limit: Duration) -> ExecResult {
        let mut channel = match self.open_exec(command).await {
            Ok(channel) => channel,
            Err(e) => return ExecResult::failed(e.to_string()),
        };

        match read_command_output(&mut channel, limit).await {
            Some((stdout, stderr, exit_code)) => {
                let exit_code = exit_code.map_or(-1, |c| i32::try_from(c).unwrap_or(i32::MAX));
                debug!(host = %self.address(), command = %command, exit_code, "Remote command finished");
                ExecResult {
                    stdout: String::from_utf8_lossy(&stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
                    exit_code,
                    error: None,
                }
            }
            None => {
                let _ = channel.close().await;
                ExecResult::failed(format!(
                    "command timed out after {}s",
                    limit.as_secs()
                ))
            }
        }
    }
}

#[async_trait]
impl CommandRunner for SshClient {
    async fn run(&self, command: &str) -> ExecResult {
        self.exec_with_timeout(command, self.command_timeout()).await
    }
}
