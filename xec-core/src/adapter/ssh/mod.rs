//! SSH adapter: remote command execution, sudo escalation, SFTP transfer,
//! and local port forwarding, all over pooled connections.

pub mod pool;
pub mod sftp;
pub mod sudo;
pub mod tunnel;

use async_trait::async_trait;
use russh::ChannelMsg;

use super::{adapter_err, Adapter, FileTransfer};
use crate::command::{Command, SshTarget, StdinSource};
use crate::error::{CancelOrigin, Result, XecError};
use crate::result::{ExecResult, ExitStatus};

pub struct SshAdapter {
    target: SshTarget,
    pool: std::sync::Arc<pool::SshPool>,
}

impl SshAdapter {
    pub fn new(target: SshTarget, pool: std::sync::Arc<pool::SshPool>) -> Self {
        Self { target, pool }
    }
}

#[async_trait]
impl Adapter for SshAdapter {
    fn kind(&self) -> &'static str {
        "ssh"
    }

    async fn execute(&self, command: &Command, max_buffer_bytes: usize) -> Result<ExecResult> {
        if command.cancel_token.is_cancelled() {
            return Err(XecError::Cancelled {
                command: command.display_line(false),
                origin: CancelOrigin::User,
            });
        }

        let started = std::time::Instant::now();
        let lease = self.pool.acquire(&self.target).await?;

        let mut command_line = build_remote_command_line(command, &self.target);
        let mut cleanup_path = None;
        if let Some(sudo) = self.target.sudo.as_ref().filter(|s| s.enabled) {
            let (wrapped, cleanup) = sudo::wrap_with_sudo(&lease, sudo, &command_line).await?;
            command_line = wrapped;
            cleanup_path = cleanup;
        }

        let channel = lease
            .handle()
            .channel_open_session()
            .await
            .map_err(|e| adapter_err("ssh", "channel_open", e))?;

        let run = async {
            channel
                .exec(true, command_line.clone())
                .await
                .map_err(|e| adapter_err("ssh", "exec", e))?;

            if let StdinSource::Bytes(bytes) = &command.stdin {
                channel
                    .data(bytes.as_ref())
                    .await
                    .map_err(|e| adapter_err("ssh", "stdin", e))?;
            }
            channel.eof().await.ok();

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code = None;
            let mut exit_signal = None;

            let mut channel = channel;
            loop {
                let Some(msg) = channel.wait().await else {
                    break;
                };
                match msg {
                    ChannelMsg::Data { data } => {
                        push_capped(&mut stdout, &data, max_buffer_bytes)?;
                    }
                    ChannelMsg::ExtendedData { data, .. } => {
                        push_capped(&mut stderr, &data, max_buffer_bytes)?;
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        exit_code = Some(exit_status as i32);
                    }
                    ChannelMsg::ExitSignal { signal_name, .. } => {
                        exit_signal = Some(format!("{signal_name:?}"));
                    }
                    ChannelMsg::Eof | ChannelMsg::Close => break,
                    _ => {}
                }
            }

            Ok::<_, XecError>((stdout, stderr, exit_code, exit_signal))
        };

        let outcome = match command.timeout {
            Some(duration) => tokio::time::timeout(duration, run)
                .await
                .map_err(|_| XecError::Timeout {
                    command: command.display_line(false),
                    timeout: duration,
                })?,
            None => run.await,
        };

        if let Some(path) = cleanup_path {
            let _ = sudo::remove_askpass_script(&lease, &path).await;
        }
        self.pool.release(&self.target, lease).await;

        let (stdout, stderr, exit_code, signal) = outcome?;
        let status = match (exit_code, signal) {
            (_, Some(_)) => ExitStatus::Signal(-1),
            (Some(code), None) => ExitStatus::Code(code),
            (None, None) => ExitStatus::Code(-1),
        };

        Ok(ExecResult {
            stdout,
            stderr,
            status,
            duration: started.elapsed(),
            command_line: command.display_line(false),
            adapter: "ssh",
            from_cache: false,
        })
    }

    async fn dispose(&self) -> Result<()> {
        self.pool.dispose_target(&self.target).await;
        Ok(())
    }

    fn as_file_transfer(&self) -> Option<&dyn FileTransfer> {
        Some(self)
    }
}

#[async_trait]
impl FileTransfer for SshAdapter {
    async fn copy_to(&self, local: &std::path::Path, remote: &str) -> Result<()> {
        let lease = self.pool.acquire(&self.target).await?;
        let result = sftp::copy_to(&lease, local, remote).await;
        self.pool.release(&self.target, lease).await;
        result
    }

    async fn copy_from(&self, remote: &str, local: &std::path::Path) -> Result<()> {
        let lease = self.pool.acquire(&self.target).await?;
        let result = sftp::copy_from(&lease, remote, local).await;
        self.pool.release(&self.target, lease).await;
        result
    }
}

fn build_remote_command_line(command: &Command, _target: &SshTarget) -> String {
    let mut line = command.program.clone();
    for arg in &command.args {
        line.push(' ');
        line.push_str(&crate::escape::posix_quote(arg));
    }
    if let Some(cwd) = &command.cwd {
        line = format!("cd {} && {}", crate::escape::posix_quote(cwd), line);
    }
    for (key, value) in &command.env {
        line = format!("{}={} {}", key, crate::escape::posix_quote(value), line);
    }
    line
}

fn push_capped(buf: &mut Vec<u8>, data: &[u8], limit: usize) -> Result<()> {
    if buf.len() + data.len() > limit {
        return Err(XecError::BufferOverflow { limit });
    }
    buf.extend_from_slice(data);
    Ok(())
}
