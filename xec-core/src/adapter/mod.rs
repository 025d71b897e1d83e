//! Adapter trait and the registry that routes a `Command` to one.

pub mod cluster_pod;
pub mod container;
pub mod local;
pub mod ssh;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::Command;
use crate::error::{Result, XecError};
use crate::result::ExecResult;

/// File transfer and tunneling capabilities an adapter may optionally
/// support beyond the base `execute`/`dispose` contract.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn copy_to(&self, local: &std::path::Path, remote: &str) -> Result<()>;
    async fn copy_from(&self, remote: &str, local: &std::path::Path) -> Result<()>;
}

/// The capability set every adapter must implement.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Short tag used in `Result::adapter`, events, and error variants.
    fn kind(&self) -> &'static str;

    /// Runs `command` to completion (or failure) and returns a populated
    /// `ExecResult`. Implementations are responsible for honoring `cwd`,
    /// `env`, `stdin`, sinks, `timeout`, `useShell`, `cancelToken`, and
    /// `maxBufferBytes` per the shared adapter contract.
    async fn execute(&self, command: &Command, max_buffer_bytes: usize) -> Result<ExecResult>;

    /// Releases any resources the adapter holds (pooled connections,
    /// ephemeral containers, background tasks). Idempotent.
    async fn dispose(&self) -> Result<()>;

    /// Adapters that support file transfer return themselves here.
    fn as_file_transfer(&self) -> Option<&dyn FileTransfer> {
        None
    }
}

/// Looks up and owns the adapter instances an `Engine` routes commands to.
/// Adapters are constructed lazily on first use of a given kind/target and
/// cached for reuse (connection pooling, ephemeral container reuse).
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    local: Arc<tokio::sync::OnceCell<Arc<local::LocalAdapter>>>,
    ssh_pool: Arc<ssh::pool::SshPool>,
    containers: Arc<tokio::sync::Mutex<HashMap<String, Arc<container::ContainerAdapter>>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn local(&self) -> Arc<local::LocalAdapter> {
        self.local
            .get_or_init(|| async { Arc::new(local::LocalAdapter::new()) })
            .await
            .clone()
    }

    pub fn ssh_pool(&self) -> Arc<ssh::pool::SshPool> {
        self.ssh_pool.clone()
    }

    pub async fn container_for(
        &self,
        target: &crate::command::ContainerTarget,
    ) -> Result<Arc<container::ContainerAdapter>> {
        let key = container::handle_key(target);
        let mut guard = self.containers.lock().await;
        if let Some(existing) = guard.get(&key) {
            return Ok(existing.clone());
        }
        let adapter = Arc::new(container::ContainerAdapter::new(target.clone()).await?);
        guard.insert(key, adapter.clone());
        Ok(adapter)
    }

    pub async fn dispose_all(&self) -> Result<()> {
        if let Some(local) = self.local.get() {
            local.dispose().await?;
        }
        self.ssh_pool.dispose_all().await;
        let mut guard = self.containers.lock().await;
        for (_, adapter) in guard.drain() {
            adapter.dispose().await?;
        }
        Ok(())
    }
}

/// Resolves an adapter error into `XecError::Adapter`, the common case for
/// glue code that doesn't need a more specific variant.
pub fn adapter_err(
    adapter: &'static str,
    operation: &'static str,
    source: impl Into<anyhow::Error>,
) -> XecError {
    XecError::Adapter {
        adapter,
        operation,
        source: source.into(),
    }
}
