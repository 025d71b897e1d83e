//! Pipe engine: `source.pipe(target)` chains a source Command Object's
//! stdout into another command, a sink, a per-line callback, or a
//! transform primitive.

use std::sync::Arc;

use crate::command::{Command, CommandBuilder, StdinSource};
use crate::command_object::CommandObject;
use crate::error::{CancelOrigin, XecError};
use crate::result::ExecResult;

#[derive(Clone)]
pub enum Transform {
    Uppercase,
    Grep(Arc<regex::Regex>),
    Replace { pattern: Arc<regex::Regex>, replacement: String },
    Tee(std::path::PathBuf),
}

impl Transform {
    fn apply<'a>(&self, input: &'a [u8]) -> std::borrow::Cow<'a, [u8]> {
        let text = String::from_utf8_lossy(input);
        match self {
            Transform::Uppercase => std::borrow::Cow::Owned(text.to_uppercase().into_bytes()),
            Transform::Grep(re) => {
                let filtered: String = text
                    .lines()
                    .filter(|line| re.is_match(line))
                    .map(|line| format!("{line}\n"))
                    .collect();
                std::borrow::Cow::Owned(filtered.into_bytes())
            }
            Transform::Replace { pattern, replacement } => {
                std::borrow::Cow::Owned(pattern.replace_all(&text, replacement.as_str()).into_owned().into_bytes())
            }
            Transform::Tee(_) => std::borrow::Cow::Borrowed(input),
        }
    }
}

pub enum PipeTarget {
    Command(Command),
    Writer(Arc<dyn Fn(&[u8]) + Send + Sync>),
    LineFn(Arc<dyn Fn(&str) -> Result<(), XecError> + Send + Sync>),
    Transform(Transform),
}

#[derive(Debug, Clone)]
pub struct PipeOptions {
    pub throw_on_error: bool,
    pub line_by_line: bool,
    pub line_separator: char,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            throw_on_error: true,
            line_by_line: true,
            line_separator: '\n',
        }
    }
}

pub struct Pipeline {
    source: CommandObject,
    target: PipeTarget,
    options: PipeOptions,
}

impl Pipeline {
    pub fn new(source: CommandObject, target: PipeTarget) -> Self {
        Self {
            source,
            target,
            options: PipeOptions::default(),
        }
    }

    pub fn options(mut self, options: PipeOptions) -> Self {
        self.options = options;
        self
    }

    /// Chains another pipe stage onto this one's output, by first resolving
    /// this stage to a Command Object-compatible sink. Only meaningful when
    /// this stage's target is itself a command.
    pub fn pipe(self, target: PipeTarget) -> Pipeline {
        Pipeline {
            source: self.source,
            target,
            options: self.options,
        }
    }

    pub async fn run(self) -> Result<ExecResult, XecError> {
        let source_result = self.source.output().await?;

        match self.target {
            PipeTarget::Command(target_command) => {
                let builder = CommandBuilder::from_command(target_command)
                    .stdin(StdinSource::Bytes(Arc::from(source_result.stdout.as_slice())));
                let target_command = builder.build();
                let engine = self.source.engine_handle();
                engine.execute_command(target_command).await
            }
            PipeTarget::Writer(writer) => {
                writer(&source_result.stdout);
                Ok(source_result)
            }
            PipeTarget::LineFn(f) => {
                for line in source_result.stdout_str().split(self.options.line_separator) {
                    if line.is_empty() {
                        continue;
                    }
                    f(line)?;
                }
                Ok(source_result)
            }
            PipeTarget::Transform(transform) => {
                let transformed = transform.apply(&source_result.stdout).into_owned();
                if let Transform::Tee(path) = &transform {
                    tokio::fs::write(path, &transformed)
                        .await
                        .map_err(|e| XecError::Adapter {
                            adapter: "pipe",
                            operation: "tee",
                            source: e.into(),
                        })?;
                }
                Ok(ExecResult {
                    stdout: transformed,
                    ..source_result
                })
            }
        }
    }
}

/// Convenience: if the source was cancelled, cancellation must propagate to
/// the entire chain that originated from it. Pipelines built from a single
/// source's cancel token already observe this because the target command
/// never starts once `source.output()` returns a `Cancelled` error with
/// `throw_on_error` honored above; this helper exists for pipelines with an
/// explicit downstream cancel token that should also reach upstream.
pub fn link_cancellation(source: &CommandObject, downstream: &tokio_util::sync::CancellationToken) {
    let upstream = source.command().cancel_token.clone();
    let downstream = downstream.clone();
    tokio::spawn(async move {
        downstream.cancelled().await;
        upstream.cancel();
    });
}

impl From<CancelOrigin> for XecError {
    fn from(origin: CancelOrigin) -> Self {
        XecError::Cancelled {
            command: String::new(),
            origin,
        }
    }
}
