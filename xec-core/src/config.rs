//! Engine configuration: the recognized option set, validated at
//! construction rather than deferred to first use, matching the
//! validate-eagerly posture of the tool-config layer this crate family
//! uses elsewhere.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::XecError;

/// Top-level, serializable engine configuration. Produced by a config
/// manager collaborator and handed to `Engine::new`/`Engine::with`; the
/// core only validates and consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub default_timeout_ms: u64,
    pub throw_on_non_zero_exit: bool,
    pub encoding: Encoding,
    pub max_buffer_bytes: usize,
    pub default_cwd: Option<String>,
    pub default_env: HashMap<String, String>,
    pub default_shell: Option<String>,
    pub enable_events: bool,
    pub max_event_listeners: usize,
    pub cache: CacheConfig,
    pub ssh: SshConfig,
    pub sanitization_bypass: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    Utf8,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Utf8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            default_ttl_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub max_connections: usize,
    pub idle_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    pub keepalive_max_missed: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            idle_timeout_ms: 300_000,
            keepalive_interval_ms: 30_000,
            keepalive_max_missed: 3,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            throw_on_non_zero_exit: true,
            encoding: Encoding::Utf8,
            max_buffer_bytes: 10 * 1024 * 1024,
            default_cwd: None,
            default_env: HashMap::new(),
            default_shell: None,
            enable_events: true,
            max_event_listeners: 100,
            cache: CacheConfig::default(),
            ssh: SshConfig::default(),
            sanitization_bypass: false,
        }
    }
}

impl EngineConfig {
    /// Validates recognized options; invalid values fail construction
    /// rather than surfacing as a runtime error on first use.
    pub fn validate(&self) -> Result<(), XecError> {
        if self.max_buffer_bytes == 0 {
            return Err(XecError::Validation(
                "max_buffer_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_event_listeners == 0 {
            return Err(XecError::Validation(
                "max_event_listeners must be greater than zero".to_string(),
            ));
        }
        if self.ssh.max_connections == 0 {
            return Err(XecError::Validation(
                "ssh.max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn cache_default_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.default_ttl_ms)
    }

    pub fn ssh_pool_config(&self) -> crate::adapter::ssh::pool::PoolConfig {
        crate::adapter::ssh::pool::PoolConfig {
            max_connections: self.ssh.max_connections,
            idle_timeout: Duration::from_millis(self.ssh.idle_timeout_ms),
            keepalive_interval: Duration::from_millis(self.ssh.keepalive_interval_ms),
            keepalive_max_missed: self.ssh.keepalive_max_missed,
            acquire_timeout: Duration::from_millis(self.ssh.acquire_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_buffer_rejected() {
        let config = EngineConfig {
            max_buffer_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ssh_connections_rejected() {
        let config = EngineConfig {
            ssh: SshConfig {
                max_connections: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
