//! Cluster-pod adapter: drives the `kubectl` CLI for exec, logs, port
//! forwarding, and file copy within a namespace/context.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::{adapter_err, Adapter, FileTransfer};
use crate::command::{Command, PodSelector, PodTarget};
use crate::error::{CancelOrigin, Result, XecError};
use crate::result::{ExecResult, ExitStatus};

pub struct ClusterPodAdapter {
    target: PodTarget,
}

impl ClusterPodAdapter {
    pub fn new(target: PodTarget) -> Self {
        Self { target }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ns) = &self.target.namespace {
            args.push("-n".to_string());
            args.push(ns.clone());
        }
        if let Some(ctx) = &self.target.context {
            args.push("--context".to_string());
            args.push(ctx.clone());
        }
        if let Some(kubeconfig) = &self.target.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        args
    }

    /// Resolves `pod_or_selector` to the concrete pod names `exec`/`logs`
    /// should fan out to.
    async fn resolve_pods(&self) -> Result<Vec<String>> {
        match &self.target.pod_or_selector {
            PodSelector::Name(name) => Ok(vec![name.clone()]),
            PodSelector::LabelSelector(selector) => {
                let mut args = self.base_args();
                args.extend([
                    "get".to_string(),
                    "pods".to_string(),
                    "-l".to_string(),
                    selector.clone(),
                    "-o".to_string(),
                    "jsonpath={.items[*].metadata.name}".to_string(),
                ]);
                let output = run_kubectl(&args).await?;
                Ok(output.split_whitespace().map(str::to_string).collect())
            }
        }
    }

    /// Runs `cmd` in the chosen container of one pod, returning its Result.
    async fn exec_one(&self, pod: &str, command: &Command, max_buffer_bytes: usize) -> Result<ExecResult> {
        let started = std::time::Instant::now();
        let mut args = self.base_args();
        args.push("exec".to_string());
        args.push(pod.to_string());
        if let Some(container) = &self.target.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        args.push("--".to_string());
        args.push(command.program.clone());
        args.extend(command.args.iter().cloned());

        let mut proc = tokio::process::Command::new("kubectl");
        proc.args(&args).stdout(Stdio::piped()).stderr(Stdio::piped());
        proc.kill_on_drop(true);
        let mut child = proc.spawn().map_err(|e| adapter_err("cluster_pod", "exec", e))?;

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut out = child.stdout.take();
        let mut err = child.stderr.take();
        let drain = async {
            let stdout_fut = async {
                if let Some(out) = out.as_mut() {
                    read_capped(out, &mut stdout_buf, max_buffer_bytes).await
                } else {
                    Ok(())
                }
            };
            let stderr_fut = async {
                if let Some(err) = err.as_mut() {
                    read_capped(err, &mut stderr_buf, max_buffer_bytes).await
                } else {
                    Ok(())
                }
            };
            tokio::try_join!(stdout_fut, stderr_fut)
        };
        drain.await?;

        let status = match command.timeout {
            Some(duration) => tokio::time::timeout(duration, child.wait())
                .await
                .map_err(|_| XecError::Timeout {
                    command: command.display_line(false),
                    timeout: duration,
                })?
                .map_err(|e| adapter_err("cluster_pod", "wait", e))?,
            None => child.wait().await.map_err(|e| adapter_err("cluster_pod", "wait", e))?,
        };

        Ok(ExecResult {
            stdout: stdout_buf,
            stderr: stderr_buf,
            status: ExitStatus::Code(status.code().unwrap_or(-1)),
            duration: started.elapsed(),
            command_line: command.display_line(false),
            adapter: "cluster-pod",
            from_cache: false,
        })
    }

    pub async fn logs(&self, pod: &str, follow: bool, tail: Option<u32>) -> Result<String> {
        let mut args = self.base_args();
        args.push("logs".to_string());
        args.push(pod.to_string());
        if let Some(container) = &self.target.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        if follow {
            args.push("-f".to_string());
        }
        if let Some(tail) = tail {
            args.push(format!("--tail={tail}"));
        }
        run_kubectl(&args).await
    }

    pub async fn port_forward(&self, pod: &str, local_port: u16, remote_port: u16) -> Result<PortForward> {
        let mut args = self.base_args();
        args.push("port-forward".to_string());
        args.push(pod.to_string());
        args.push(format!("{local_port}:{remote_port}"));

        let mut proc = tokio::process::Command::new("kubectl");
        proc.args(&args).stdout(Stdio::piped()).kill_on_drop(true);
        let mut child = proc.spawn().map_err(|e| adapter_err("cluster_pod", "port_forward", e))?;

        let assigned_port = if local_port != 0 {
            local_port
        } else if let Some(stdout) = child.stdout.take() {
            read_assigned_port(stdout).await.unwrap_or(local_port)
        } else {
            local_port
        };

        Ok(PortForward {
            local_port: assigned_port,
            child,
        })
    }

    pub async fn copy_to(&self, local: &std::path::Path, pod: &str, remote: &str) -> Result<()> {
        let mut args = self.base_args();
        let target = match &self.target.container {
            Some(c) => format!("{pod}:{remote} -c {c}"),
            None => format!("{pod}:{remote}"),
        };
        args.push("cp".to_string());
        args.push(local.display().to_string());
        args.extend(target.split_whitespace().map(str::to_string));
        run_kubectl(&args).await.map(|_| ())
    }

    pub async fn copy_from(&self, pod: &str, remote: &str, local: &std::path::Path) -> Result<()> {
        let mut args = self.base_args();
        let source = match &self.target.container {
            Some(c) => format!("{pod}:{remote} -c {c}"),
            None => format!("{pod}:{remote}"),
        };
        args.push("cp".to_string());
        args.extend(source.split_whitespace().map(str::to_string));
        args.push(local.display().to_string());
        run_kubectl(&args).await.map(|_| ())
    }
}

pub struct PortForward {
    pub local_port: u16,
    child: tokio::process::Child,
}

impl PortForward {
    pub async fn close(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

async fn read_assigned_port(mut stdout: tokio::process::ChildStdout) -> Option<u16> {
    let mut buf = [0u8; 256];
    let n = stdout.read(&mut buf).await.ok()?;
    let text = String::from_utf8_lossy(&buf[..n]);
    text.rsplit("-> ").next()?.trim().parse().ok()
}

async fn read_capped(
    stream: &mut (impl tokio::io::AsyncRead + Unpin),
    buf: &mut Vec<u8>,
    limit: usize,
) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| adapter_err("cluster_pod", "read_output", e))?;
        if n == 0 {
            return Ok(());
        }
        if buf.len() + n > limit {
            return Err(XecError::BufferOverflow { limit });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn run_kubectl(args: &[String]) -> Result<String> {
    let output = tokio::process::Command::new("kubectl")
        .args(args)
        .output()
        .await
        .map_err(|e| adapter_err("cluster_pod", "kubectl", e))?;
    if !output.status.success() {
        return Err(adapter_err(
            "cluster_pod",
            "kubectl",
            anyhow::anyhow!(String::from_utf8_lossy(&output.stderr).into_owned()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl Adapter for ClusterPodAdapter {
    fn kind(&self) -> &'static str {
        "cluster-pod"
    }

    async fn execute(&self, command: &Command, max_buffer_bytes: usize) -> Result<ExecResult> {
        if command.cancel_token.is_cancelled() {
            return Err(XecError::Cancelled {
                command: command.display_line(false),
                origin: CancelOrigin::User,
            });
        }
        let pods = self.resolve_pods().await?;
        let Some(first) = pods.first() else {
            return Err(XecError::Validation("label selector matched no pods".into()));
        };
        // A selector matching more than one pod fans out; callers that need
        // every pod's result should use `exec_fanout` directly.
        self.exec_one(first, command, max_buffer_bytes).await
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }

    fn as_file_transfer(&self) -> Option<&dyn FileTransfer> {
        Some(self)
    }
}

#[async_trait]
impl FileTransfer for ClusterPodAdapter {
    async fn copy_to(&self, local: &std::path::Path, remote: &str) -> Result<()> {
        let pods = self.resolve_pods().await?;
        let pod = pods.first().ok_or_else(|| XecError::Validation("no pod matched".into()))?;
        self.copy_to(local, pod, remote).await
    }

    async fn copy_from(&self, remote: &str, local: &std::path::Path) -> Result<()> {
        let pods = self.resolve_pods().await?;
        let pod = pods.first().ok_or_else(|| XecError::Validation("no pod matched".into()))?;
        self.copy_from(pod, remote, local).await
    }
}

impl ClusterPodAdapter {
    /// Fans an exec out to every pod matched by a label selector, returning
    /// one result per pod in resolution order.
    pub async fn exec_fanout(&self, command: &Command, max_buffer_bytes: usize) -> Result<Vec<ExecResult>> {
        let pods = self.resolve_pods().await?;
        let mut results = Vec::with_capacity(pods.len());
        for pod in pods {
            results.push(self.exec_one(&pod, command, max_buffer_bytes).await?);
        }
        Ok(results)
    }
}
