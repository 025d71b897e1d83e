//! Error taxonomy shared by the engine and every adapter.
//!
//! Each variant carries the context a caller needs to react programmatically
//! (classify, retry, log) without parsing a message string. Adapter glue code
//! is free to use `anyhow` internally while wrapping a third-party client
//! library error; it must classify that error into one of these variants
//! before it crosses back into engine code.

use std::time::Duration;

use crate::result::ExecResult;

/// The closed set of error kinds produced by the engine and its adapters.
#[derive(Debug, thiserror::Error)]
pub enum XecError {
    /// The process ran to completion but exited non-zero or was signalled,
    /// and the caller did not opt into `nothrow`.
    #[error("command failed: {command} ({cause})")]
    Command {
        command: String,
        exit_code: Option<i32>,
        signal: Option<String>,
        cause: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        duration: Duration,
    },

    /// The command did not complete before its deadline.
    #[error("command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },

    /// A cancel token fired before or during execution.
    #[error("command cancelled ({origin}): {command}")]
    Cancelled {
        command: String,
        origin: CancelOrigin,
    },

    /// Network or connection-setup failure: SSH connect, pool acquisition,
    /// channel open.
    #[error("connection error to {host}: {source}")]
    Connection {
        host: String,
        #[source]
        source: anyhow::Error,
    },

    /// Generic adapter failure: unknown adapter, bad option, missing binary.
    #[error("adapter error ({adapter}/{operation}): {source}")]
    Adapter {
        adapter: &'static str,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Container-runtime specific failure.
    #[error("container error on {target} ({operation}): {source}")]
    Container {
        target: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Cluster-pod specific failure.
    #[error("cluster-pod error on {target} ({operation}): {source}")]
    ClusterPod {
        target: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid Engine or Command configuration. Always thrown, never
    /// converted to a Result even under `nothrow`.
    #[error("validation error: {0}")]
    Validation(String),

    /// Captured stdout or stderr exceeded `max_buffer_bytes`.
    #[error("output buffer overflow: exceeded {limit} bytes")]
    BufferOverflow { limit: usize },

    /// All retry attempts were exhausted.
    #[error("retry exhausted after {attempts} attempts: {source}")]
    Retry {
        attempts: u32,
        #[source]
        source: Box<XecError>,
        last_result: Option<Box<ExecResult>>,
    },
}

/// Where a cancellation originated, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOrigin {
    User,
    Timeout,
    PipeParent,
}

impl std::fmt::Display for CancelOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CancelOrigin::User => "user",
            CancelOrigin::Timeout => "timeout",
            CancelOrigin::PipeParent => "pipe-parent",
        };
        f.write_str(s)
    }
}

impl XecError {
    /// Whether this error represents a transient condition a retry policy's
    /// default `retryable` predicate should consider retrying.
    ///
    /// `Command` (a deliberate non-zero exit) is never retryable by default;
    /// only a policy's explicit `retryable` override can opt it in.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            XecError::Connection { .. } | XecError::Timeout { .. }
        ) || matches!(self, XecError::Adapter { source, .. } if is_transient_io(source))
    }

    /// Short machine-readable category, useful for metrics/log fields.
    pub fn category(&self) -> &'static str {
        match self {
            XecError::Command { .. } => "command",
            XecError::Timeout { .. } => "timeout",
            XecError::Cancelled { .. } => "cancelled",
            XecError::Connection { .. } => "connection",
            XecError::Adapter { .. } => "adapter",
            XecError::Container { .. } => "container",
            XecError::ClusterPod { .. } => "cluster_pod",
            XecError::Validation(_) => "validation",
            XecError::BufferOverflow { .. } => "buffer_overflow",
            XecError::Retry { .. } => "retry",
        }
    }
}

fn is_transient_io(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .map(|e| {
            matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            )
        })
        .unwrap_or(false)
}

pub type Result<T> = std::result::Result<T, XecError>;
