//! Structured logging setup.
//!
//! Mirrors the layered-registry approach used throughout this crate family: an
//! `EnvFilter` sourced from `RUST_LOG` (falling back to a sensible default), a
//! stderr formatting layer, and an optional daily rolling file appender.
//! Initialization is idempotent so library consumers and tests can both call it
//! freely.

use std::io::stderr;
use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

/// Initializes logging for test binaries: trace level, always to stderr.
pub fn init_test_logging() {
    init_logging("trace", None);
}

/// Initializes the global tracing subscriber.
///
/// `default_level` is used when `RUST_LOG` is unset. `log_dir`, when `Some`,
/// directs output to a daily rolling file in that directory instead of
/// stderr; ANSI colors are disabled for file output and enabled for stderr.
pub fn init_logging(default_level: &str, log_dir: Option<&std::path::Path>) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},xec_core=debug")));

        match log_dir {
            Some(dir) => {
                if std::fs::create_dir_all(dir).is_ok() {
                    let file_appender = tracing_appender::rolling::daily(dir, "xec.log");
                    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(layer().with_writer(non_blocking).with_ansi(false))
                        .init();
                    // Leaked intentionally: keeps the non-blocking writer alive for
                    // the process lifetime so buffered logs are flushed on exit.
                    Box::leak(Box::new(guard));
                } else {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(layer().with_writer(stderr).with_ansi(true))
                        .init();
                }
            }
            None => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(stderr).with_ansi(true))
                    .init();
            }
        }
    });
}
