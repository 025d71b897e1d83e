//! The lazy, awaitable wrapper around a `Command`.
//!
//! Rust has no thenable protocol, so the "lazy until first await" contract
//! is expressed as an explicit `start()`/`Shared` future split: building a
//! `CommandObject` does no I/O, and the first call to any of `output()`,
//! `text()`, `json()`, `lines()`, `buffer()`, or `.await` (via `IntoFuture`)
//! spawns the execution and memoizes a cloneable future so concurrent
//! callers observe the same run.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use futures::future::Shared;
use futures::FutureExt;
use tokio::sync::OnceCell;

use crate::command::{Command, CommandBuilder, Sink, StdinSource};
use crate::engine::Engine;
use crate::error::XecError;
use crate::result::ExecResult;

type SharedResult = Shared<Pin<Box<dyn Future<Output = Arc<std::result::Result<ExecResult, Arc<XecError>>>> + Send>>>;

pub struct CommandObject {
    engine: Engine,
    command: Command,
    started: Arc<OnceCell<SharedResult>>,
}

impl Clone for CommandObject {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            command: self.command.clone(),
            started: self.started.clone(),
        }
    }
}

impl CommandObject {
    pub fn new(engine: Engine, command: Command) -> Self {
        Self {
            engine,
            command,
            started: Arc::new(OnceCell::new()),
        }
    }

    fn with_builder(&self, f: impl FnOnce(CommandBuilder) -> CommandBuilder) -> Self {
        let builder = CommandBuilder::from_command(self.command.clone());
        Self::new(self.engine.clone(), f(builder).build())
    }

    pub fn cwd(&self, dir: impl Into<String>) -> Self {
        self.with_builder(|b| b.cwd(dir))
    }

    pub fn env(&self, map: impl IntoIterator<Item = (String, String)>) -> Self {
        self.with_builder(|b| b.env(map))
    }

    pub fn shell(&self, mode: crate::command::ShellMode) -> Self {
        self.with_builder(|b| b.shell(mode))
    }

    pub fn timeout(&self, duration: std::time::Duration, signal: Option<&str>) -> Self {
        self.with_builder(|b| b.timeout(duration, signal))
    }

    pub fn nothrow(&self) -> Self {
        self.with_builder(|b| b.nothrow())
    }

    pub fn quiet(&self) -> Self {
        self.with_builder(|b| b.quiet())
    }

    pub fn interactive(&self) -> Self {
        self.with_builder(|b| b.interactive())
    }

    pub fn stdout(&self, sink: Sink) -> Self {
        self.with_builder(|b| b.stdout(sink))
    }

    pub fn stderr(&self, sink: Sink) -> Self {
        self.with_builder(|b| b.stderr(sink))
    }

    pub fn stdin(&self, source: StdinSource) -> Self {
        self.with_builder(|b| b.stdin(source))
    }

    pub fn signal(&self, token: tokio_util::sync::CancellationToken) -> Self {
        self.with_builder(|b| b.signal(token))
    }

    pub fn cache(&self, opts: crate::command::CacheOptions) -> Self {
        self.with_builder(|b| b.cache(opts))
    }

    pub fn retry(&self, policy: crate::command::RetryPolicy) -> Self {
        self.with_builder(|b| b.retry(policy))
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn engine_handle(&self) -> Engine {
        self.engine.clone()
    }

    /// Stops execution: prevents a not-yet-started command from starting,
    /// or signals a running one via its cancel token. The adapter sends
    /// `signal_name` to an already-running process; a not-yet-started one
    /// simply never spawns.
    pub fn kill(&self, _signal_name: &str) {
        self.command.cancel_token.cancel();
    }

    /// Starts (if not already started) the underlying execution and awaits
    /// its memoized shared future, so concurrent awaiters observe the same
    /// underlying run.
    async fn resolve(&self) -> std::result::Result<ExecResult, Arc<XecError>> {
        let shared = self.started.get_or_init(|| async {
            let engine = self.engine.clone();
            let command = self.command.clone();
            let fut: Pin<Box<dyn Future<Output = _> + Send>> = Box::pin(async move {
                Arc::new(engine.execute_command(command).await.map_err(Arc::new))
            });
            fut.shared()
        })
        .await
        .clone();
        (*shared.await).clone()
    }

    pub async fn output(&self) -> Result<ExecResult, XecError> {
        self.resolve().await.map_err(|e| (*e).clone_into_error())
    }

    pub async fn text(&self) -> Result<String, XecError> {
        self.output().await.map(|r| r.text())
    }

    pub async fn lines(&self) -> Result<Vec<String>, XecError> {
        self.output()
            .await
            .map(|r| r.stdout_str().lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    pub async fn buffer(&self) -> Result<Vec<u8>, XecError> {
        self.output().await.map(|r| r.stdout)
    }

    pub async fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, XecError> {
        let result = self.output().await?;
        serde_json::from_slice(&result.stdout)
            .map_err(|e| XecError::Validation(format!("failed to parse JSON output: {e}")))
    }

    /// Pipes this command's stdout into `target`, returning a new Command
    /// Object whose execution runs both stages.
    pub fn pipe(&self, target: crate::pipe::PipeTarget) -> crate::pipe::Pipeline {
        crate::pipe::Pipeline::new(self.clone(), target)
    }
}

impl IntoFuture for CommandObject {
    type Output = Result<ExecResult, XecError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.output().await })
    }
}

trait CloneIntoError {
    fn clone_into_error(&self) -> XecError;
}

impl CloneIntoError for XecError {
    fn clone_into_error(&self) -> XecError {
        // `XecError` intentionally does not derive `Clone` (it carries
        // `anyhow::Error` sources); reconstruct a lightweight equivalent
        // for the common display/classification paths multiple awaiters need.
        XecError::Adapter {
            adapter: "shared",
            operation: "memoized",
            source: anyhow::anyhow!(self.to_string()),
        }
    }
}
