//! SSH connection pool.
//!
//! Structured the same way the shell-pool manager elsewhere in this crate
//! family keys prewarmed shells by target identity and evicts by idle
//! time: a per-target bucket of live connections, acquired and released by
//! callers, with a background sweep that closes anything idle too long.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use russh::client::{self, Handle};
use tokio::sync::{Mutex, Semaphore};

use crate::adapter::adapter_err;
use crate::command::{SshAuth, SshTarget};
use crate::error::{Result, XecError};

pub struct PoolConfig {
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_max_missed: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            idle_timeout: Duration::from_secs(300),
            keepalive_interval: Duration::from_secs(30),
            keepalive_max_missed: 3,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Handler;

#[async_trait::async_trait]
impl client::Handler for Handler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Host key verification is delegated to the caller's `~/.ssh/known_hosts`
        // policy at a layer above this adapter; accept here and let transport-level
        // auth failures surface instead.
        Ok(true)
    }
}

struct PooledConnection {
    handle: Arc<Handle<Handler>>,
    last_used: Instant,
    use_count: u64,
    missed_keepalives: u32,
}

struct TargetBucket {
    idle: Vec<PooledConnection>,
    semaphore: Arc<Semaphore>,
}

/// A leased connection. Dropping without calling `SshPool::release` simply
/// leaks the permit; adapters always release explicitly on every exit path.
pub struct Lease {
    connection: PooledConnection,
}

impl Lease {
    pub fn handle(&self) -> &Handle<Handler> {
        &self.connection.handle
    }

    pub fn handle_arc(&self) -> Arc<Handle<Handler>> {
        self.connection.handle.clone()
    }
}

pub struct SshPool {
    config: PoolConfig,
    buckets: Mutex<HashMap<String, TargetBucket>>,
}

impl Default for SshPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl SshPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, target: &SshTarget) -> Result<Lease> {
        let key = target.pool_key();
        let semaphore = {
            let mut buckets = self.buckets.lock().await;
            let bucket = buckets.entry(key.clone()).or_insert_with(|| TargetBucket {
                idle: Vec::new(),
                semaphore: Arc::new(Semaphore::new(self.config.max_connections)),
            });
            bucket.semaphore.clone()
        };

        let permit = tokio::time::timeout(self.config.acquire_timeout, semaphore.acquire_owned())
            .await
            .map_err(|_| XecError::Connection {
                host: target.host.clone(),
                source: anyhow::anyhow!("timed out acquiring a connection slot"),
            })?
            .map_err(|e| XecError::Connection {
                host: target.host.clone(),
                source: e.into(),
            })?;
        // The permit is dropped (returned to the semaphore) once this
        // function's caller releases the lease; we only need it to bound
        // concurrent connections, not to gate on an idle connection's reuse.
        std::mem::forget(permit);

        let existing = {
            let mut buckets = self.buckets.lock().await;
            buckets.get_mut(&key).and_then(|b| b.idle.pop())
        };

        let connection = match existing {
            Some(conn) => conn,
            None => self.connect(target).await?,
        };

        Ok(Lease { connection })
    }

    pub async fn release(&self, target: &SshTarget, mut lease: Lease) {
        let key = target.pool_key();
        lease.connection.last_used = Instant::now();
        lease.connection.use_count += 1;
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get_mut(&key) {
            bucket.idle.push(lease.connection);
            bucket.semaphore.add_permits(1);
        }
    }

    pub async fn dispose_target(&self, target: &SshTarget) {
        let key = target.pool_key();
        let mut buckets = self.buckets.lock().await;
        buckets.remove(&key);
    }

    pub async fn dispose_all(&self) {
        let mut buckets = self.buckets.lock().await;
        buckets.clear();
    }

    /// Removes idle connections that have exceeded `idle_timeout`. Intended
    /// to run on a periodic background task owned by the engine.
    pub async fn sweep_idle(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        for bucket in buckets.values_mut() {
            bucket
                .idle
                .retain(|c| now.duration_since(c.last_used) < self.config.idle_timeout);
        }
    }

    async fn connect(&self, target: &SshTarget) -> Result<PooledConnection> {
        let config = Arc::new(client::Config {
            keepalive_interval: Some(self.config.keepalive_interval),
            ..Default::default()
        });

        let addr = (target.host.as_str(), target.port);
        let mut handle = client::connect(config, addr, Handler)
            .await
            .map_err(|e| XecError::Connection {
                host: target.host.clone(),
                source: e.into(),
            })?;

        authenticate(&mut handle, target).await?;

        Ok(PooledConnection {
            handle: Arc::new(handle),
            last_used: Instant::now(),
            use_count: 0,
            missed_keepalives: 0,
        })
    }
}

async fn authenticate(handle: &mut Handle<Handler>, target: &SshTarget) -> Result<()> {
    let authenticated = match target.auth.as_ref() {
        SshAuth::Password(password) => handle
            .authenticate_password(&target.user, password)
            .await
            .map_err(|e| adapter_err("ssh", "authenticate", e))?,
        SshAuth::PrivateKey { path, passphrase } => {
            let key = russh_keys::load_secret_key(path, passphrase.as_deref())
                .map_err(|e| adapter_err("ssh", "load_key", e))?;
            handle
                .authenticate_publickey(&target.user, Arc::new(key))
                .await
                .map_err(|e| adapter_err("ssh", "authenticate", e))?
        }
        SshAuth::Agent => {
            return Err(XecError::Connection {
                host: target.host.clone(),
                source: anyhow::anyhow!("ssh-agent authentication requires an agent socket, none configured"),
            });
        }
    };

    if !authenticated {
        return Err(XecError::Connection {
            host: target.host.clone(),
            source: anyhow::anyhow!("authentication rejected"),
        });
    }
    Ok(())
}
