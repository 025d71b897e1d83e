//! The outcome of a single executed command.

use std::fmt;
use std::time::Duration;

/// How a process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with the given code.
    Code(i32),
    /// Killed by a signal (Unix only; `None` signal name on platforms that
    /// can't report it).
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Code(c) => Some(*c),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(c) => write!(f, "exit code {c}"),
            ExitStatus::Signal(s) => write!(f, "signal {s}"),
        }
    }
}

/// The full record of a completed (or `nothrow`-suppressed-failure)
/// execution, returned from `Command::run`/`Engine::run` and carried inside
/// `XecError::Command` for failures.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitStatus,
    pub duration: Duration,
    /// The fully resolved command line, after templating and escaping, as
    /// actually sent to the adapter. Useful for logging and cache keys.
    pub command_line: String,
    /// Adapter that produced this result, e.g. `"local"`, `"ssh"`.
    pub adapter: &'static str,
    /// `true` when this result was served from the cache rather than a
    /// fresh execution.
    pub from_cache: bool,
}

impl ExecResult {
    pub fn ok(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Trimmed stdout, the common case for capturing a single value.
    pub fn text(&self) -> String {
        self.stdout_str().trim().to_string()
    }
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({:?}, {})",
            self.adapter, self.command_line, self.duration, self.status
        )
    }
}
