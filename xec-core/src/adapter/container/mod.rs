//! Container adapter: exec in an existing container or an ephemeral one
//! derived from an image, via the Docker Engine API.

pub mod compose;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;

use super::{adapter_err, Adapter, FileTransfer};
use crate::command::{Command, ContainerRef, ContainerRefOrEmpty, ContainerTarget};
use crate::error::{CancelOrigin, Result, XecError};
use crate::result::{ExecResult, ExitStatus};

pub fn handle_key(target: &ContainerTarget) -> String {
    match &target.container {
        ContainerRefOrEmpty::Set(ContainerRef::Existing { name_or_id }) => {
            format!("existing:{name_or_id}")
        }
        ContainerRefOrEmpty::Set(ContainerRef::Ephemeral { image, .. }) => {
            format!("ephemeral:{image}")
        }
        ContainerRefOrEmpty::Unset => "unset".to_string(),
    }
}

pub struct ContainerAdapter {
    docker: Docker,
    container_id: String,
    target: ContainerTarget,
    owns_container: bool,
    auto_remove: bool,
}

impl ContainerAdapter {
    pub async fn new(target: ContainerTarget) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| adapter_err("container", "connect", e))?;

        let (container_id, owns_container, auto_remove) = match &target.container {
            ContainerRefOrEmpty::Set(ContainerRef::Existing { name_or_id }) => {
                (name_or_id.clone(), false, false)
            }
            ContainerRefOrEmpty::Set(ContainerRef::Ephemeral {
                image,
                volumes,
                ports,
                network,
                auto_remove,
            }) => {
                let name = format!(
                    "xec-{}-{}-{}",
                    image.rsplit('/').next().unwrap_or(image).replace(':', "-"),
                    chrono::Utc::now().timestamp(),
                    uuid::Uuid::new_v4().simple()
                );
                create_ephemeral(&docker, &name, image, volumes, ports, network.as_deref()).await?;
                (name, true, *auto_remove)
            }
            ContainerRefOrEmpty::Unset => {
                return Err(XecError::Validation(
                    "container target requires either an existing container or an image".into(),
                ))
            }
        };

        Ok(Self {
            docker,
            container_id,
            target,
            owns_container,
            auto_remove,
        })
    }

    pub async fn start(&self) -> Result<()> {
        self.docker
            .start_container(&self.container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| adapter_err("container", "start", e))
    }

    pub async fn stop(&self) -> Result<()> {
        self.docker
            .stop_container(&self.container_id, None)
            .await
            .map_err(|e| adapter_err("container", "stop", e))
    }

    pub async fn restart(&self) -> Result<()> {
        self.docker
            .restart_container(&self.container_id, None)
            .await
            .map_err(|e| adapter_err("container", "restart", e))
    }

    pub async fn remove(&self) -> Result<()> {
        self.docker
            .remove_container(
                &self.container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| adapter_err("container", "remove", e))
    }

    pub async fn inspect(&self) -> Result<bollard::models::ContainerInspectResponse> {
        self.docker
            .inspect_container(&self.container_id, None)
            .await
            .map_err(|e| adapter_err("container", "inspect", e))
    }

    pub async fn stats_once(&self) -> Result<bollard::container::Stats> {
        let mut stream = self.docker.stats(
            &self.container_id,
            Some(bollard::container::StatsOptions {
                stream: false,
                ..Default::default()
            }),
        );
        stream
            .next()
            .await
            .ok_or_else(|| XecError::Validation("no stats returned".into()))?
            .map_err(|e| adapter_err("container", "stats", e))
    }

    pub async fn stream_logs<F>(&self, follow: bool, tail: Option<&str>, mut on_line: F) -> Result<()>
    where
        F: FnMut(String) + Send,
    {
        let mut stream = self.docker.logs(
            &self.container_id,
            Some(LogsOptions::<String> {
                follow,
                stdout: true,
                stderr: true,
                tail: tail.unwrap_or("all").to_string(),
                timestamps: false,
                ..Default::default()
            }),
        );
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| adapter_err("container", "logs", e))?;
            on_line(chunk.to_string());
        }
        Ok(())
    }

    pub async fn wait_for_healthy(&self, timeout: std::time::Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let inspect = self.inspect().await?;
            let healthy = inspect
                .state
                .as_ref()
                .and_then(|s| s.health.as_ref())
                .and_then(|h| h.status)
                .map(|status| status == bollard::models::HealthStatusEnum::HEALTHY)
                .unwrap_or(false);
            if healthy {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(XecError::Timeout {
                    command: format!("waitForHealthy({})", self.container_id),
                    timeout,
                });
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }
}

async fn create_ephemeral(
    docker: &Docker,
    name: &str,
    image: &str,
    volumes: &[(String, String)],
    ports: &[(u16, u16)],
    network: Option<&str>,
) -> Result<()> {
    let binds: Vec<String> = volumes
        .iter()
        .map(|(host, container)| format!("{host}:{container}"))
        .collect();
    let port_bindings: std::collections::HashMap<String, Option<Vec<bollard::models::PortBinding>>> =
        ports
            .iter()
            .map(|(host, container)| {
                (
                    format!("{container}/tcp"),
                    Some(vec![bollard::models::PortBinding {
                        host_ip: None,
                        host_port: Some(host.to_string()),
                    }]),
                )
            })
            .collect();

    let config = Config {
        image: Some(image.to_string()),
        tty: Some(true),
        host_config: Some(bollard::models::HostConfig {
            binds: Some(binds),
            port_bindings: Some(port_bindings),
            network_mode: network.map(|n| n.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };

    docker
        .create_container(
            Some(CreateContainerOptions {
                name: name.to_string(),
                platform: None,
            }),
            config,
        )
        .await
        .map_err(|e| adapter_err("container", "create", e))?;
    docker
        .start_container(name, None::<StartContainerOptions<String>>)
        .await
        .map_err(|e| adapter_err("container", "start", e))?;
    Ok(())
}

#[async_trait]
impl Adapter for ContainerAdapter {
    fn kind(&self) -> &'static str {
        "container"
    }

    async fn execute(&self, command: &Command, max_buffer_bytes: usize) -> Result<ExecResult> {
        if command.cancel_token.is_cancelled() {
            return Err(XecError::Cancelled {
                command: command.display_line(false),
                origin: CancelOrigin::User,
            });
        }

        let started = std::time::Instant::now();
        let mut argv = vec![command.program.clone()];
        argv.extend(command.args.iter().cloned());

        let exec = self
            .docker
            .create_exec(
                &self.container_id,
                CreateExecOptions {
                    cmd: Some(argv),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: command.cwd.clone().or_else(|| self.target.workdir.clone()),
                    env: Some(
                        command
                            .env
                            .iter()
                            .map(|(k, v)| format!("{k}={v}"))
                            .collect(),
                    ),
                    user: self.target.user.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| adapter_err("container", "create_exec", e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let run = async {
            if let StartExecResults::Attached { mut output, .. } = self
                .docker
                .start_exec(&exec.id, None)
                .await
                .map_err(|e| adapter_err("container", "start_exec", e))?
            {
                while let Some(msg) = output.next().await {
                    let msg = msg.map_err(|e| adapter_err("container", "exec_stream", e))?;
                    let (buf, bytes) = match &msg {
                        bollard::container::LogOutput::StdOut { message } => (&mut stdout, message),
                        bollard::container::LogOutput::StdErr { message } => (&mut stderr, message),
                        _ => continue,
                    };
                    if buf.len() + bytes.len() > max_buffer_bytes {
                        return Err(XecError::BufferOverflow {
                            limit: max_buffer_bytes,
                        });
                    }
                    buf.extend_from_slice(bytes);
                }
            }
            Ok::<_, XecError>(())
        };

        match command.timeout {
            Some(duration) => tokio::time::timeout(duration, run).await.map_err(|_| {
                XecError::Timeout {
                    command: command.display_line(false),
                    timeout: duration,
                }
            })??,
            None => run.await?,
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| adapter_err("container", "inspect_exec", e))?;
        let exit_code = inspect.exit_code.unwrap_or(0) as i32;

        Ok(ExecResult {
            stdout,
            stderr,
            status: ExitStatus::Code(exit_code),
            duration: started.elapsed(),
            command_line: command.display_line(false),
            adapter: "container",
            from_cache: false,
        })
    }

    async fn dispose(&self) -> Result<()> {
        if self.owns_container && self.auto_remove {
            self.remove().await?;
        }
        Ok(())
    }

    fn as_file_transfer(&self) -> Option<&dyn FileTransfer> {
        Some(self)
    }
}

#[async_trait]
impl FileTransfer for ContainerAdapter {
    async fn copy_to(&self, local: &std::path::Path, remote: &str) -> Result<()> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| adapter_err("container", "copy_to_read", e))?;
        let mut archive = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut archive);
            let file_name = local
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "file".to_string());
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, &file_name, data.as_slice())
                .map_err(|e| adapter_err("container", "copy_to_tar", e))?;
            builder
                .finish()
                .map_err(|e| adapter_err("container", "copy_to_tar", e))?;
        }
        self.docker
            .upload_to_container(
                &self.container_id,
                Some(bollard::container::UploadToContainerOptions {
                    path: remote.to_string(),
                    no_overwrite_dir_non_dir: String::new(),
                }),
                archive.into(),
            )
            .await
            .map_err(|e| adapter_err("container", "upload", e))
    }

    async fn copy_from(&self, remote: &str, local: &std::path::Path) -> Result<()> {
        let mut stream = self.docker.download_from_container(
            &self.container_id,
            Some(bollard::container::DownloadFromContainerOptions {
                path: remote.to_string(),
            }),
        );
        let mut archive_bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            archive_bytes.extend_from_slice(&chunk.map_err(|e| adapter_err("container", "download", e))?);
        }
        let mut archive = tar::Archive::new(archive_bytes.as_slice());
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| adapter_err("container", "copy_from_mkdir", e))?;
        }
        archive
            .unpack(local.parent().unwrap_or_else(|| std::path::Path::new(".")))
            .map_err(|e| adapter_err("container", "copy_from_unpack", e))
    }
}
