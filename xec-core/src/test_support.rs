//! Shared fixtures for integration tests: a scriptable fake adapter and a
//! couple of engine builders with predictable defaults, so scenario tests
//! don't depend on what binaries happen to be on the host running CI.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::Adapter;
use crate::command::Command;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::result::{ExecResult, ExitStatus};

/// An adapter whose responses are scripted ahead of time, for deterministic
/// retry/cache/cancellation tests that don't want to depend on real
/// process timing.
pub struct ScriptedAdapter {
    responses: std::sync::Mutex<Vec<Result<ExecResult>>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(responses: Vec<Result<ExecResult>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn execute(&self, command: &Command, _max_buffer_bytes: usize) -> Result<ExecResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.responses.lock().expect("scripted adapter poisoned");
        if guard.is_empty() {
            return Ok(success_result(command, ""));
        }
        guard.remove(0)
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

pub fn success_result(command: &Command, stdout: &str) -> ExecResult {
    ExecResult {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        status: ExitStatus::Code(0),
        duration: Duration::from_millis(1),
        command_line: command.display_line(false),
        adapter: "scripted",
        from_cache: false,
    }
}

pub fn failure_result(command: &Command, exit_code: i32) -> ExecResult {
    ExecResult {
        stdout: Vec::new(),
        stderr: Vec::new(),
        status: ExitStatus::Code(exit_code),
        duration: Duration::from_millis(1),
        command_line: command.display_line(false),
        adapter: "scripted",
        from_cache: false,
    }
}

/// A minimal Engine for tests that only exercise local-adapter behavior,
/// with a short default timeout so hangs fail fast.
pub fn fast_engine() -> Engine {
    Engine::new(EngineConfig {
        default_timeout_ms: 5_000,
        ..EngineConfig::default()
    })
    .expect("default config is valid")
}

pub fn arc_adapter(responses: Vec<Result<ExecResult>>) -> Arc<ScriptedAdapter> {
    Arc::new(ScriptedAdapter::new(responses))
}
