//! The engine: entry point that builds Command Objects, merges layered
//! defaults, routes to an adapter, and owns shared resources (cache,
//! connection pool, event bus, temp registry).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{Adapter, AdapterRegistry};
use crate::cache::Cache;
use crate::command::{
    AdapterKind, AdapterOptions, Command, CommandBuilder, ContainerTarget, PodTarget, RetryPolicy,
    ShellMode, SshTarget,
};
use crate::command_object::CommandObject;
use crate::config::EngineConfig;
use crate::context::AmbientContext;
use crate::error::{Result, XecError};
use crate::events::{Event, EventBus};
use crate::result::ExecResult;
use crate::tempfs::TempRegistry;

/// Defaults accumulated by `with`/`cd`/`env`/... and merged under the
/// ambient context and the template resolver's own parts, per the
/// defaults-chain order documented on `Command`.
#[derive(Debug, Clone, Default)]
pub struct EngineDefaults {
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub shell: Option<ShellMode>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub adapter_kind: Option<AdapterKind>,
    pub adapter_options: Option<AdapterOptions>,
}

#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    defaults: EngineDefaults,
    registry: AdapterRegistry,
    cache: Cache,
    events: EventBus,
    temp: TempRegistry,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let cache = Cache::new(config.cache.max_entries, config.cache_default_ttl());
        let events = EventBus::new(config.max_event_listeners, config.enable_events);
        Ok(Self {
            config: Arc::new(config),
            defaults: EngineDefaults::default(),
            registry: AdapterRegistry::new(),
            cache,
            events,
            temp: TempRegistry::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Builds a new `Command` for `program`/`args`, applying the engine's
    /// current defaults. Interpolated template values should already be
    /// escaped by the caller (`run`) or intentionally left raw (`raw`).
    fn new_command(&self, program: impl Into<String>, args: Vec<String>) -> Command {
        let mut builder = CommandBuilder::new(program, args);
        let ambient = crate::context::current();

        if let Some(cwd) = ambient.cwd.or_else(|| self.defaults.cwd.clone()).or_else(|| self.config.default_cwd.clone()) {
            builder = builder.cwd(cwd);
        }
        let mut env = self.config.default_env.clone();
        env.extend(self.defaults.env.clone());
        env.extend(ambient.env.clone());
        if !env.is_empty() {
            builder = builder.env(env);
        }
        if let Some(shell) = self.defaults.shell.clone() {
            builder = builder.shell(shell);
        } else if let Some(shell) = &self.config.default_shell {
            builder = builder.shell(ShellMode::Explicit(shell.clone()));
        }
        builder = builder.timeout(self.defaults.timeout.unwrap_or_else(|| self.config.default_timeout()), None);
        if let Some(retry) = self.defaults.retry.clone() {
            builder = builder.retry(retry);
        }

        let kind = ambient.adapter.or(self.defaults.adapter_kind).unwrap_or(AdapterKind::Auto);
        let options = self.defaults.adapter_options.clone().unwrap_or(AdapterOptions::Local);
        builder = builder.adapter(kind, options);

        builder.build()
    }

    /// Composes argv from a template literal: literal text is split on
    /// whitespace into words, each interpolated value becomes one atomic
    /// argument regardless of embedded spaces or quotes. Dispatched
    /// directly (no shell), so there is nothing for a shell to
    /// reinterpret — safe by construction rather than by escaping.
    pub fn run(&self, template: &[&str], values: &[String]) -> CommandObject {
        let mut argv = build_argv(template, values).into_iter();
        let program = argv.next().unwrap_or_default();
        let args: Vec<String> = argv.collect();
        let command = self.new_command(program, args);
        CommandObject::new(self.clone(), command)
    }

    /// Composes a single command string from a template literal with
    /// values spliced in unescaped, then dispatches it through a shell so
    /// pipes/redirects/globs in the literal portions are honored. Values
    /// are the caller's responsibility; this is the unsafe escape hatch
    /// `run` exists to avoid.
    pub fn raw(&self, template: &[&str], values: &[String]) -> CommandObject {
        let composed = interleave(template, values);
        let mut command = self.new_command(composed, Vec::new());
        command.shell = self.defaults.shell.clone().unwrap_or(ShellMode::DefaultShell);
        CommandObject::new(self.clone(), command)
    }

    /// Direct, non-template entry: merges defaults, selects an adapter,
    /// emits lifecycle events, runs (with retry if configured), and
    /// returns a `Result`.
    pub async fn execute(&self, command: impl Into<Command>) -> Result<ExecResult> {
        self.execute_command(command.into()).await
    }

    pub(crate) async fn execute_command(&self, mut command: Command) -> Result<ExecResult> {
        if command.adapter_kind == AdapterKind::Auto {
            command.adapter_kind = command.adapter_options.kind();
        }

        let adapter = self.select_adapter(&command).await?;
        let command_line = command.display_line(self.config.sanitization_bypass);

        self.events.emit(Event::CommandStart {
            command: command_line.clone(),
            adapter: adapter.kind(),
            cwd: command.cwd.clone(),
            timestamp: crate::events::now_millis(),
        });

        let started = std::time::Instant::now();
        let cache_key = command.cache_key();
        let cache_opts = command.cache.clone();
        let max_buffer = self.config.max_buffer_bytes;
        let events = self.events.clone();
        let retry = command.retry.clone();

        let outcome: Result<ExecResult> = if let Some(policy) = retry {
            crate::retry::run_with_retry(&policy, &events, |_attempt| {
                let adapter = adapter.clone();
                let command = command.clone();
                async move { adapter.execute(&command, max_buffer).await }
            })
            .await
        } else {
            let cacheable = cache_opts.is_some();
            let ttl = cache_opts.as_ref().and_then(|o| o.ttl);
            let adapter = adapter.clone();
            let command = command.clone();
            self.cache
                .get_or_run(cache_key.clone(), ttl, cacheable, move || async move {
                    adapter.execute(&command, max_buffer).await
                })
                .await
        };

        if let Some(opts) = &command.cache {
            if !opts.invalidate_on.is_empty() {
                self.cache.invalidate(&opts.invalidate_on);
            }
        }

        match outcome {
            Ok(result) => {
                self.events.emit(Event::CommandComplete {
                    command: command_line,
                    exit_code: result.status.code(),
                    duration: started.elapsed(),
                    adapter: adapter.kind(),
                    timestamp: crate::events::now_millis(),
                });
                if !result.ok() && !command.nothrow && self.config.throw_on_non_zero_exit {
                    return Err(XecError::Command {
                        command: result.command_line.clone(),
                        exit_code: result.status.code(),
                        signal: None,
                        cause: result.status.to_string(),
                        stdout: result.stdout.clone(),
                        stderr: result.stderr.clone(),
                        duration: result.duration,
                    });
                }
                Ok(result)
            }
            Err(err) => {
                self.events.emit(Event::CommandError {
                    command: command_line,
                    error: err.to_string(),
                    duration: started.elapsed(),
                    adapter: adapter.kind(),
                    timestamp: crate::events::now_millis(),
                });
                Err(err)
            }
        }
    }

    async fn select_adapter(&self, command: &Command) -> Result<Arc<dyn Adapter>> {
        let adapter: Arc<dyn Adapter> = match &command.adapter_options {
            AdapterOptions::Local => self.registry.local().await,
            AdapterOptions::Ssh(target) => Arc::new(crate::adapter::ssh::SshAdapter::new(
                target.clone(),
                self.registry.ssh_pool(),
            )),
            AdapterOptions::Container(target) => self.registry.container_for(target).await?,
            AdapterOptions::ClusterPod(target) => {
                Arc::new(crate::adapter::cluster_pod::ClusterPodAdapter::new(target.clone()))
            }
        };
        Ok(adapter)
    }

    /// Returns a derived engine sharing the adapter registry, cache, and
    /// event bus but with merged defaults.
    pub fn with(&self, f: impl FnOnce(EngineDefaults) -> EngineDefaults) -> Engine {
        Engine {
            config: self.config.clone(),
            defaults: f(self.defaults.clone()),
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            events: self.events.clone(),
            temp: self.temp.clone(),
        }
    }

    pub fn cd(&self, dir: impl Into<String>) -> Engine {
        let dir = dir.into();
        self.with(|mut d| {
            d.cwd = Some(dir);
            d
        })
    }

    pub fn env(&self, map: impl IntoIterator<Item = (String, String)>) -> Engine {
        let map: HashMap<String, String> = map.into_iter().collect();
        self.with(|mut d| {
            d.env.extend(map);
            d
        })
    }

    pub fn timeout(&self, duration: Duration) -> Engine {
        self.with(|mut d| {
            d.timeout = Some(duration);
            d
        })
    }

    pub fn shell(&self, mode: ShellMode) -> Engine {
        self.with(|mut d| {
            d.shell = Some(mode);
            d
        })
    }

    pub fn retry(&self, policy: RetryPolicy) -> Engine {
        self.with(|mut d| {
            d.retry = Some(policy);
            d
        })
    }

    pub fn local(&self) -> Engine {
        self.with(|mut d| {
            d.adapter_kind = Some(AdapterKind::Local);
            d.adapter_options = Some(AdapterOptions::Local);
            d
        })
    }

    pub fn ssh(&self, target: SshTarget) -> Engine {
        self.with(|mut d| {
            d.adapter_kind = Some(AdapterKind::Ssh);
            d.adapter_options = Some(AdapterOptions::Ssh(target));
            d
        })
    }

    pub fn container(&self, target: ContainerTarget) -> Engine {
        self.with(|mut d| {
            d.adapter_kind = Some(AdapterKind::Container);
            d.adapter_options = Some(AdapterOptions::Container(target));
            d
        })
    }

    pub fn pod(&self, target: PodTarget) -> Engine {
        self.with(|mut d| {
            d.adapter_kind = Some(AdapterKind::ClusterPod);
            d.adapter_options = Some(AdapterOptions::ClusterPod(target));
            d
        })
    }

    pub async fn parallel_settled(
        &self,
        commands: Vec<Command>,
        options: crate::parallel::ParallelOptions,
    ) -> Vec<crate::parallel::Settled> {
        crate::parallel::settled(self, commands, options).await
    }

    pub async fn batch(
        &self,
        commands: Vec<Command>,
        options: crate::parallel::ParallelOptions,
    ) -> Vec<crate::parallel::Settled> {
        crate::parallel::settled(self, commands, options).await
    }

    pub fn temp_file(&self, opts: crate::tempfs::TempFileOptions) -> std::io::Result<crate::tempfs::TempFileHandle> {
        self.temp.temp_file(opts)
    }

    pub fn temp_dir(&self, opts: crate::tempfs::TempFileOptions) -> std::io::Result<crate::tempfs::TempDirHandle> {
        self.temp.temp_dir(opts)
    }

    pub async fn with_temp_file<F, Fut, T>(&self, opts: crate::tempfs::TempFileOptions, f: F) -> std::io::Result<T>
    where
        F: FnOnce(crate::tempfs::TempFileHandle) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.temp.with_temp_file(opts, f).await
    }

    pub async fn with_temp_dir<F, Fut, T>(&self, opts: crate::tempfs::TempFileOptions, f: F) -> std::io::Result<T>
    where
        F: FnOnce(crate::tempfs::TempDirHandle) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.temp.with_temp_dir(opts, f).await
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let adapter = self.registry.local().await;
        crate::fileops::read_file(adapter.as_ref(), &self.events, path).await
    }

    pub async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let adapter = self.registry.local().await;
        crate::fileops::write_file(adapter.as_ref(), &self.events, path, contents).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let adapter = self.registry.local().await;
        crate::fileops::delete_file(adapter.as_ref(), &self.events, path).await
    }

    /// Idempotent: aborts nothing already completed, releases pooled
    /// connections and temp resources, clears the adapter registry.
    pub async fn dispose(&self) -> Result<()> {
        self.registry.dispose_all().await?;
        self.temp.dispose_all();
        Ok(())
    }
}

/// Runs `fn` with an ambient config that any Engine call made during it
/// must observe, isolated per concurrent flow.
pub async fn within<F, T>(context: AmbientContext, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    crate::context::within(context, fut).await
}

fn interleave(template: &[&str], values: &[String]) -> String {
    let mut out = String::new();
    for (i, piece) in template.iter().enumerate() {
        out.push_str(piece);
        if let Some(value) = values.get(i) {
            out.push_str(value);
        }
    }
    out
}

/// Splits template literal text on whitespace into words, but appends
/// each interpolated value whole to whatever word is open at that
/// point — a value's own whitespace never introduces a new argument.
fn build_argv(template: &[&str], values: &[String]) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, piece) in template.iter().enumerate() {
        let mut start = 0;
        for (idx, ch) in piece.char_indices() {
            if ch.is_whitespace() {
                current.push_str(&piece[start..idx]);
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                start = idx + ch.len_utf8();
            }
        }
        current.push_str(&piece[start..]);

        if let Some(value) = values.get(i) {
            current.push_str(value);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_runs_local_command() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let command = CommandBuilder::new("echo", vec!["ok".to_string()]).build();
        let result = engine.execute(command).await.unwrap();
        assert_eq!(result.text(), "ok");
    }

    #[tokio::test]
    async fn nonzero_exit_throws_by_default() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let command = CommandBuilder::new("false", vec![]).build();
        let result = engine.execute(command).await;
        assert!(matches!(result, Err(XecError::Command { .. })));
    }

    #[tokio::test]
    async fn nothrow_suppresses_error() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let command = CommandBuilder::new("false", vec![]).nothrow().build();
        let result = engine.execute(command).await.unwrap();
        assert!(!result.ok());
    }

    #[tokio::test]
    async fn with_derives_engine_sharing_cache() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let derived = engine.cd("/tmp");
        assert_eq!(derived.defaults.cwd.as_deref(), Some("/tmp"));
    }

    #[tokio::test]
    async fn run_keeps_interpolated_value_as_one_argument() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let object = engine.run(&["echo ", ""], &["hello world".to_string()]);
        let result = object.output().await.unwrap();
        assert_eq!(result.text(), "hello world");
    }

    #[tokio::test]
    async fn run_preserves_quotes_and_apostrophes_in_values() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let object = engine.run(&["echo ", ""], &["it's \"fine\"".to_string()]);
        let result = object.output().await.unwrap();
        assert_eq!(result.text(), "it's \"fine\"");
    }

    #[test]
    fn build_argv_treats_values_as_atomic_words() {
        let argv = build_argv(&["cp ", " ", ""], &["a b".to_string(), "dest".to_string()]);
        assert_eq!(argv, vec!["cp".to_string(), "a b".to_string(), "dest".to_string()]);
    }

    #[tokio::test]
    async fn within_overrides_cwd_for_enclosed_calls() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        tokio::fs::write(&marker, b"x").await.unwrap();
        let ctx = AmbientContext {
            cwd: Some(dir.path().display().to_string()),
            env: HashMap::new(),
            adapter: None,
        };
        let engine2 = engine.clone();
        let result = within(ctx, async move {
            let command = CommandBuilder::new("ls", vec![]).build();
            engine2.execute(command).await
        })
        .await
        .unwrap();
        assert!(result.text().contains("marker"));
    }
}
