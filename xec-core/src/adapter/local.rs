//! Local process adapter: spawns a child on the host OS.
//!
//! The timeout-then-grace-then-kill sequencing mirrors the task-abort
//! sequencing used elsewhere in this crate family: signal first, give the
//! process a chance to exit cleanly, then escalate to an unconditional
//! kill.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;

use super::{adapter_err, Adapter};
use crate::command::{Command, Sink, StdinSource};
use crate::error::{CancelOrigin, Result, XecError};
use crate::result::{ExecResult, ExitStatus};

const KILL_GRACE: Duration = Duration::from_secs(2);

pub struct LocalAdapter;

impl LocalAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn signal_number(name: &str) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal;
    match name {
        "SIGTERM" => Signal::SIGTERM,
        "SIGKILL" => Signal::SIGKILL,
        "SIGINT" => Signal::SIGINT,
        "SIGHUP" => Signal::SIGHUP,
        "SIGQUIT" => Signal::SIGQUIT,
        _ => Signal::SIGTERM,
    }
}

fn send_signal(pid: u32, name: &str) {
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    let _ = nix::sys::signal::kill(pid, signal_number(name));
}

#[async_trait]
impl Adapter for LocalAdapter {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, command: &Command, max_buffer_bytes: usize) -> Result<ExecResult> {
        if command.cancel_token.is_cancelled() {
            return Err(XecError::Cancelled {
                command: command.display_line(false),
                origin: CancelOrigin::User,
            });
        }

        let mut proc = build_tokio_command(command);
        proc.stdin(match command.stdin {
            StdinSource::None => Stdio::null(),
            _ => Stdio::piped(),
        });
        proc.stdout(sink_stdio(&command.stdout));
        proc.stderr(sink_stdio(&command.stderr));

        let started = Instant::now();
        let mut child = proc
            .spawn()
            .map_err(|e| adapter_err("local", "spawn", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            feed_stdin(&mut stdin, &command.stdin).await;
        }

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut child_stdout = child.stdout.take();
        let mut child_stderr = child.stderr.take();

        let read_fut = async {
            tokio::try_join!(
                read_capped(&mut child_stdout, &mut stdout_buf, max_buffer_bytes),
                read_capped(&mut child_stderr, &mut stderr_buf, max_buffer_bytes),
            )
        };

        let display_line = command.display_line(false);
        let wait_result = tokio::select! {
            biased;
            _ = command.cancel_token.cancelled() => {
                send_signal(child.id().unwrap_or_default(), &command.timeout_signal);
                wait_with_grace(&mut child).await;
                return Err(XecError::Cancelled {
                    command: command.display_line(false),
                    origin: CancelOrigin::User,
                });
            }
            res = run_with_optional_timeout(command.timeout, read_fut, &mut child, &command.timeout_signal, &display_line) => res,
        };

        let status = wait_result?;

        Ok(ExecResult {
            stdout: stdout_buf,
            stderr: stderr_buf,
            status,
            duration: started.elapsed(),
            command_line: command.display_line(false),
            adapter: "local",
            from_cache: false,
        })
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

fn build_tokio_command(command: &Command) -> TokioCommand {
    let mut proc = match &command.shell {
        crate::command::ShellMode::Direct => {
            let mut c = TokioCommand::new(&command.program);
            c.args(&command.args);
            c
        }
        crate::command::ShellMode::DefaultShell | crate::command::ShellMode::Explicit(_) => {
            let shell_path = match &command.shell {
                crate::command::ShellMode::Explicit(path) => path.clone(),
                _ => default_shell(),
            };
            let mut full = command.program.clone();
            for arg in &command.args {
                full.push(' ');
                full.push_str(&crate::escape::posix_quote(arg));
            }
            let mut c = TokioCommand::new(shell_path);
            c.arg("-c").arg(full);
            c
        }
    };

    if let Some(cwd) = &command.cwd {
        proc.current_dir(cwd);
    }
    if !command.env.is_empty() {
        proc.envs(command.env.iter());
    }
    proc.kill_on_drop(true);
    proc
}

#[cfg(unix)]
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(not(unix))]
fn default_shell() -> String {
    "cmd".to_string()
}

fn sink_stdio(sink: &Sink) -> Stdio {
    match sink {
        Sink::Pipe | Sink::Writer(_) => Stdio::piped(),
        Sink::Ignore => Stdio::null(),
        Sink::Inherit => Stdio::inherit(),
    }
}

async fn feed_stdin(stdin: &mut tokio::process::ChildStdin, source: &StdinSource) {
    match source {
        StdinSource::None => {}
        StdinSource::Bytes(bytes) => {
            let _ = stdin.write_all(bytes).await;
        }
        StdinSource::Stream(shared) => {
            let mut guard = shared.lock().await;
            if let Some(rx) = guard.as_mut() {
                while let Some(chunk) = rx.recv().await {
                    if stdin.write_all(&chunk).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    // Drop to close stdin so the child observes EOF.
}

async fn read_capped(
    stream: &mut Option<impl tokio::io::AsyncRead + Unpin>,
    buf: &mut Vec<u8>,
    limit: usize,
) -> Result<()> {
    let Some(stream) = stream else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| adapter_err("local", "read_output", e))?;
        if n == 0 {
            return Ok(());
        }
        if buf.len() + n > limit {
            return Err(XecError::BufferOverflow { limit });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn wait_with_grace(child: &mut tokio::process::Child) {
    let timed_out = tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err();
    if timed_out {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

async fn run_with_optional_timeout<F>(
    timeout: Option<Duration>,
    read_fut: F,
    child: &mut tokio::process::Child,
    timeout_signal: &str,
    command_line: &str,
) -> Result<ExitStatus>
where
    F: std::future::Future<Output = Result<((), ())>>,
{
    let wait_and_read = async {
        let (status, _) = tokio::join!(child.wait(), read_fut);
        status.map_err(|e| adapter_err("local", "wait", e))
    };

    let status = match timeout {
        Some(duration) => match tokio::time::timeout(duration, wait_and_read).await {
            Ok(result) => result?,
            Err(_) => {
                send_signal(child.id().unwrap_or_default(), timeout_signal);
                wait_with_grace(child).await;
                return Err(XecError::Timeout {
                    command: command_line.to_string(),
                    timeout: duration,
                });
            }
        },
        None => wait_and_read.await?,
    };

    Ok(to_exit_status(status))
}

#[cfg(unix)]
fn to_exit_status(status: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => ExitStatus::Code(code),
        None => ExitStatus::Signal(status.signal().unwrap_or(-1)),
    }
}

#[cfg(not(unix))]
fn to_exit_status(status: std::process::ExitStatus) -> ExitStatus {
    ExitStatus::Code(status.code().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;

    #[tokio::test]
    async fn runs_simple_command() {
        let adapter = LocalAdapter::new();
        let cmd = CommandBuilder::new("echo", vec!["hello".to_string()]).build();
        let result = adapter.execute(&cmd, 1024 * 1024).await.unwrap();
        assert!(result.ok());
        assert_eq!(result.text(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_without_erroring() {
        let adapter = LocalAdapter::new();
        let cmd = CommandBuilder::new("false", vec![]).build();
        let result = adapter.execute(&cmd, 1024 * 1024).await.unwrap();
        assert!(!result.ok());
        assert_eq!(result.status.code(), Some(1));
    }

    #[tokio::test]
    async fn timeout_kills_long_running_process() {
        let adapter = LocalAdapter::new();
        let cmd = CommandBuilder::new("sleep", vec!["5".to_string()])
            .timeout(Duration::from_millis(50), None)
            .build();
        let result = adapter.execute(&cmd, 1024 * 1024).await;
        assert!(matches!(result, Err(XecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn buffer_overflow_is_detected() {
        let adapter = LocalAdapter::new();
        let cmd = CommandBuilder::new("yes", vec![]).build();
        let result = adapter.execute(&cmd, 16).await;
        assert!(matches!(result, Err(XecError::BufferOverflow { limit: 16 })));
    }

    #[tokio::test]
    async fn stdin_bytes_are_forwarded() {
        let adapter = LocalAdapter::new();
        let cmd = CommandBuilder::new("cat", vec![])
            .stdin(StdinSource::Bytes(std::sync::Arc::from(b"ping".as_slice())))
            .build();
        let result = adapter.execute(&cmd, 1024).await.unwrap();
        assert_eq!(result.text(), "ping");
    }
}
