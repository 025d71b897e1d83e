//! The `Command` data model: an immutable description of a unit of work.
//!
//! `Command` itself is a plain value type built by [`CommandBuilder`]; the
//! lazy, awaitable wrapper around it lives in [`crate::command_object`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Which backend executes a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Local,
    Ssh,
    Container,
    ClusterPod,
    /// Resolved by the engine from `adapter_options`'s discriminant, or to
    /// `Local` when no options are present.
    Auto,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Local => "local",
            AdapterKind::Ssh => "ssh",
            AdapterKind::Container => "container",
            AdapterKind::ClusterPod => "cluster-pod",
            AdapterKind::Auto => "auto",
        }
    }
}

/// Authentication method for an SSH target.
#[derive(Clone)]
pub enum SshAuth {
    PrivateKey {
        path: std::path::PathBuf,
        passphrase: Option<String>,
    },
    Password(String),
    Agent,
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshAuth::PrivateKey { path, .. } => {
                f.debug_struct("PrivateKey").field("path", path).finish()
            }
            SshAuth::Password(_) => write!(f, "Password(<redacted>)"),
            SshAuth::Agent => write!(f, "Agent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SudoMethod {
    Stdin,
    Askpass,
    SecureAskpass,
    Echo,
}

#[derive(Clone)]
pub struct SudoConfig {
    pub enabled: bool,
    pub password: Option<String>,
    pub method: SudoMethod,
}

impl std::fmt::Debug for SudoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SudoConfig")
            .field("enabled", &self.enabled)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("method", &self.method)
            .finish()
    }
}

impl Default for SudoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            password: None,
            method: SudoMethod::SecureAskpass,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: Arc<SshAuth>,
    pub sudo: Option<SudoConfig>,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>, auth: SshAuth) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            auth: Arc::new(auth),
            sudo: None,
        }
    }

    /// Canonical identity used as the connection pool key.
    pub fn pool_key(&self) -> String {
        let auth_fingerprint = match self.auth.as_ref() {
            SshAuth::PrivateKey { path, .. } => format!("key:{}", path.display()),
            SshAuth::Password(_) => "password".to_string(),
            SshAuth::Agent => "agent".to_string(),
        };
        format!("{}@{}:{}#{}", self.user, self.host, self.port, auth_fingerprint)
    }
}

#[derive(Debug, Clone)]
pub enum ContainerRef {
    Existing { name_or_id: String },
    Ephemeral {
        image: String,
        volumes: Vec<(String, String)>,
        ports: Vec<(u16, u16)>,
        network: Option<String>,
        auto_remove: bool,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ContainerTarget {
    pub container: ContainerRefOrEmpty,
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub tty: bool,
}

#[derive(Debug, Clone, Default)]
pub enum ContainerRefOrEmpty {
    #[default]
    Unset,
    Set(ContainerRef),
}

#[derive(Debug, Clone)]
pub struct PodTarget {
    pub pod_or_selector: PodSelector,
    pub container: Option<String>,
    pub namespace: Option<String>,
    pub context: Option<String>,
    pub kubeconfig: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone)]
pub enum PodSelector {
    Name(String),
    LabelSelector(String),
}

/// Discriminated target options, matching `adapterKind`.
#[derive(Debug, Clone)]
pub enum AdapterOptions {
    Local,
    Ssh(SshTarget),
    Container(ContainerTarget),
    ClusterPod(PodTarget),
}

impl AdapterOptions {
    pub fn kind(&self) -> AdapterKind {
        match self {
            AdapterOptions::Local => AdapterKind::Local,
            AdapterOptions::Ssh(_) => AdapterKind::Ssh,
            AdapterOptions::Container(_) => AdapterKind::Container,
            AdapterOptions::ClusterPod(_) => AdapterKind::ClusterPod,
        }
    }
}

/// Where a command's stdin comes from.
#[derive(Clone, Default)]
pub enum StdinSource {
    #[default]
    None,
    Bytes(Arc<[u8]>),
    /// A caller-fed byte stream; each chunk is forwarded to the child's
    /// stdin in order. Wrapped for interior access because Command must
    /// remain `Clone` while the receiver is consumed at most once.
    Stream(Arc<tokio::sync::Mutex<Option<tokio::sync::mpsc::Receiver<Vec<u8>>>>>),
}

impl std::fmt::Debug for StdinSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StdinSource::None => write!(f, "None"),
            StdinSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            StdinSource::Stream(_) => write!(f, "Stream"),
        }
    }
}

/// Where a command's stdout/stderr goes.
#[derive(Clone, Default)]
pub enum Sink {
    #[default]
    Pipe,
    Ignore,
    Inherit,
    Writer(Arc<dyn Fn(&[u8]) + Send + Sync>),
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sink::Pipe => write!(f, "Pipe"),
            Sink::Ignore => write!(f, "Ignore"),
            Sink::Inherit => write!(f, "Inherit"),
            Sink::Writer(_) => write!(f, "Writer"),
        }
    }
}

/// Whether and how a command runs through a shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ShellMode {
    #[default]
    Direct,
    DefaultShell,
    Explicit(String),
}

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub jitter: f64,
    pub retryable: Arc<dyn Fn(&crate::error::XecError) -> bool + Send + Sync>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
            retryable: Arc::new(|err| err.is_transient()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressOptions {
    pub enabled: bool,
    pub update_interval: Duration,
    pub report_lines: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub invalidate_on: Vec<String>,
}

/// An immutable unit of work. Built via [`CommandBuilder`]; every mutator
/// on the builder clones the underlying fields rather than aliasing them.
#[derive(Debug, Clone)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub timeout_signal: String,
    pub stdin: StdinSource,
    pub stdout: Sink,
    pub stderr: Sink,
    pub shell: ShellMode,
    pub detached: bool,
    pub cancel_token: CancellationToken,
    pub nothrow: bool,
    pub quiet: bool,
    pub retry: Option<RetryPolicy>,
    pub progress: Option<ProgressOptions>,
    pub adapter_kind: AdapterKind,
    pub adapter_options: AdapterOptions,
    pub cache: Option<CacheOptions>,
}

impl Command {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: HashMap::new(),
            timeout: None,
            timeout_signal: "SIGTERM".to_string(),
            stdin: StdinSource::None,
            stdout: Sink::Pipe,
            stderr: Sink::Pipe,
            shell: ShellMode::Direct,
            detached: false,
            cancel_token: CancellationToken::new(),
            nothrow: false,
            quiet: false,
            retry: None,
            progress: None,
            adapter_kind: AdapterKind::Auto,
            adapter_options: AdapterOptions::Local,
            cache: None,
        }
    }

    /// Human-readable reconstruction used for logs, events, and
    /// `Result::command`, honoring the sanitized-command rules.
    pub fn display_line(&self, bypass_sanitization: bool) -> String {
        crate::escape::sanitize_command_line(&self.program, &self.args, bypass_sanitization)
    }

    /// Stable digest used as the cache and in-flight map key.
    pub fn cache_key(&self) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.program.hash(&mut hasher);
        self.args.hash(&mut hasher);
        self.cwd.hash(&mut hasher);
        let mut env_entries: Vec<_> = self.env.iter().collect();
        env_entries.sort();
        env_entries.hash(&mut hasher);
        self.adapter_kind.as_str().hash(&mut hasher);
        if let AdapterOptions::Ssh(target) = &self.adapter_options {
            target.pool_key().hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }
}

/// Builder that accumulates immutable modifications; each method consumes
/// `self` and returns a new builder, matching the "deep-cloned per
/// mutation" contract of the Command Object.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    inner: Command,
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            inner: Command::new(program, args),
        }
    }

    pub fn from_command(inner: Command) -> Self {
        Self { inner }
    }

    pub fn build(self) -> Command {
        self.inner
    }

    pub fn cwd(mut self, dir: impl Into<String>) -> Self {
        self.inner.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, map: impl IntoIterator<Item = (String, String)>) -> Self {
        self.inner.env.extend(map);
        self
    }

    pub fn shell(mut self, mode: ShellMode) -> Self {
        self.inner.shell = mode;
        self
    }

    pub fn timeout(mut self, duration: Duration, signal: Option<&str>) -> Self {
        self.inner.timeout = Some(duration);
        if let Some(sig) = signal {
            self.inner.timeout_signal = sig.to_string();
        }
        self
    }

    pub fn nothrow(mut self) -> Self {
        self.inner.nothrow = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.inner.quiet = true;
        self
    }

    pub fn interactive(mut self) -> Self {
        self.inner.stdout = Sink::Inherit;
        self.inner.stderr = Sink::Inherit;
        self
    }

    pub fn stdout(mut self, sink: Sink) -> Self {
        self.inner.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: Sink) -> Self {
        self.inner.stderr = sink;
        self
    }

    pub fn stdin(mut self, source: StdinSource) -> Self {
        self.inner.stdin = source;
        self
    }

    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.inner.cancel_token = token;
        self
    }

    pub fn cache(mut self, opts: CacheOptions) -> Self {
        self.inner.cache = Some(opts);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.inner.retry = Some(policy);
        self
    }

    pub fn progress(mut self, opts: ProgressOptions) -> Self {
        self.inner.progress = Some(opts);
        self
    }

    pub fn adapter(mut self, kind: AdapterKind, options: AdapterOptions) -> Self {
        self.inner.adapter_kind = kind;
        self.inner.adapter_options = options;
        self
    }

    pub fn detached(mut self) -> Self {
        self.inner.detached = true;
        self
    }
}
