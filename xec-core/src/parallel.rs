//! Bounded-concurrency parallel and batch execution.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::command::Command;
use crate::engine::Engine;
use crate::error::XecError;
use crate::result::ExecResult;

/// One item's settled outcome, preserving the input index.
#[derive(Debug, Clone)]
pub struct Settled {
    pub index: usize,
    pub ok: bool,
    pub value: Option<ExecResult>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ParallelOptions {
    pub max_concurrency: usize,
    pub stop_on_error: bool,
    pub on_progress: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
    pub per_item_timeout: Option<std::time::Duration>,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            stop_on_error: false,
            on_progress: None,
            per_item_timeout: None,
        }
    }
}

/// Runs every command in `commands`, bounded to `options.max_concurrency`
/// in flight at once. Always resolves; never propagates an individual
/// item's failure to the caller. Results preserve input order regardless
/// of completion order.
pub async fn settled(engine: &Engine, commands: Vec<Command>, options: ParallelOptions) -> Vec<Settled> {
    let total = commands.len();
    let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
    let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let cancel_all = tokio_util::sync::CancellationToken::new();

    let mut tasks = FuturesUnordered::new();
    for (index, command) in commands.into_iter().enumerate() {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        let completed = completed.clone();
        let on_progress = options.on_progress.clone();
        let per_item_timeout = options.per_item_timeout;
        let cancel_all = cancel_all.clone();

        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");

            if cancel_all.is_cancelled() {
                return Settled {
                    index,
                    ok: false,
                    value: None,
                    error: Some("cancelled: a prior item failed under stop_on_error".to_string()),
                };
            }

            let mut command = command;
            command.timeout = per_item_timeout.or(command.timeout);

            let run = engine.execute_command(command);
            let outcome: Result<ExecResult, XecError> = match per_item_timeout {
                Some(duration) => match tokio::time::timeout(duration, run).await {
                    Ok(r) => r,
                    Err(_) => Err(XecError::Timeout {
                        command: format!("parallel item {index}"),
                        timeout: duration,
                    }),
                },
                None => run.await,
            };

            let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if let Some(cb) = &on_progress {
                cb(done, total);
            }

            match outcome {
                Ok(value) => Settled {
                    index,
                    ok: true,
                    value: Some(value),
                    error: None,
                },
                Err(err) => Settled {
                    index,
                    ok: false,
                    value: None,
                    error: Some(err.to_string()),
                },
            }
        }));
    }

    let mut results: Vec<Option<Settled>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.next().await {
        if let Ok(settled) = joined {
            let failed = !settled.ok;
            let index = settled.index;
            results[index] = Some(settled);
            if failed && options.stop_on_error {
                cancel_all.cancel();
            }
        }
    }

    results
        .into_iter()
        .enumerate()
        .map(|(index, s)| {
            s.unwrap_or(Settled {
                index,
                ok: false,
                value: None,
                error: Some("task panicked".to_string()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[tokio::test]
    async fn preserves_input_order() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let commands: Vec<Command> = (0..5)
            .map(|i| crate::command::CommandBuilder::new("echo", vec![i.to_string()]).build())
            .collect();
        let results = settled(&engine, commands, ParallelOptions::default()).await;
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.index, i);
            assert!(result.ok);
            assert_eq!(result.value.as_ref().unwrap().text(), i.to_string());
        }
    }

    #[tokio::test]
    async fn bounds_concurrency() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let commands: Vec<Command> = (0..8)
            .map(|_| crate::command::CommandBuilder::new("true", vec![]).build())
            .collect();
        let options = ParallelOptions {
            max_concurrency: 2,
            ..Default::default()
        };
        let results = settled(&engine, commands, options).await;
        assert!(results.iter().all(|r| r.ok));
    }
}
