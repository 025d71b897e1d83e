//! Ambient execution context for `within`.
//!
//! Implemented with a `tokio::task_local`, which is the idiomatic
//! equivalent of thread-local ambient state in an async runtime: it is
//! inherited by the future it wraps but never leaks into sibling tasks
//! spawned outside that future, so `tokio::spawn`ed parallel work started
//! inside `within` does not observe the ambient context unless explicitly
//! propagated.

use std::collections::HashMap;
use std::future::Future;

use crate::command::AdapterKind;

/// Ambient defaults that participate in a Command Object's defaults chain
/// (engine defaults < ambient context < engine's current config < command
/// parts < accumulated modifications).
#[derive(Debug, Clone, Default)]
pub struct AmbientContext {
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub adapter: Option<AdapterKind>,
}

tokio::task_local! {
    static AMBIENT: AmbientContext;
}

/// Runs `fut` with `context` installed as the ambient context for the
/// duration of that future only.
pub async fn within<F, T>(context: AmbientContext, fut: F) -> T
where
    F: Future<Output = T>,
{
    AMBIENT.scope(context, fut).await
}

/// Reads the current ambient context, if any task above this point on the
/// same future chain installed one via [`within`].
pub fn current() -> AmbientContext {
    AMBIENT
        .try_with(|ctx| ctx.clone())
        .unwrap_or_default()
}
