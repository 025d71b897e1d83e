//! Compose-project fluent API: drives the `docker compose` CLI rather than
//! the Engine API, since compose orchestration has no stable daemon-socket
//! equivalent.

use std::path::PathBuf;

use crate::adapter::adapter_err;
use crate::error::Result;

pub struct ComposeProject {
    file: PathBuf,
    project_name: Option<String>,
}

impl ComposeProject {
    pub fn new(file: impl Into<PathBuf>, project_name: Option<String>) -> Self {
        Self {
            file: file.into(),
            project_name,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["compose".to_string(), "-f".to_string(), self.file.display().to_string()];
        if let Some(name) = &self.project_name {
            args.push("-p".to_string());
            args.push(name.clone());
        }
        args
    }

    pub async fn up(&self, detach: bool) -> Result<String> {
        let mut args = self.base_args();
        args.push("up".to_string());
        if detach {
            args.push("-d".to_string());
        }
        self.run(args).await
    }

    pub async fn down(&self) -> Result<String> {
        let mut args = self.base_args();
        args.push("down".to_string());
        self.run(args).await
    }

    pub async fn ps(&self) -> Result<String> {
        let mut args = self.base_args();
        args.push("ps".to_string());
        self.run(args).await
    }

    pub async fn logs(&self, service: &str) -> Result<String> {
        let mut args = self.base_args();
        args.push("logs".to_string());
        args.push(service.to_string());
        self.run(args).await
    }

    async fn run(&self, args: Vec<String>) -> Result<String> {
        let output = tokio::process::Command::new("docker")
            .args(&args)
            .output()
            .await
            .map_err(|e| adapter_err("container", "compose", e))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
