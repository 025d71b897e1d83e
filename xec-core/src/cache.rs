//! Result cache with bounded LRU eviction and in-flight execution
//! deduplication.
//!
//! The in-flight map follows the same "move to history, then notify
//! waiters" ordering used for operation completion elsewhere in this crate
//! family: a pending entry's result is installed in the cache *before* its
//! `Notify` fires, so a waiter that wakes immediately after never observes
//! a torn state where the in-flight entry is gone but the cache entry
//! isn't there yet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::result::ExecResult;

struct CacheEntry {
    result: ExecResult,
    inserted_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
}

impl CacheEntry {
    fn valid(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

enum InFlight {
    Pending(Arc<Notify>),
    Done(ExecResult),
}

/// Shared per-`Engine` cache. Cheap to clone; clones share the same
/// underlying maps.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<std::sync::Mutex<CacheInner>>,
    default_ttl: Duration,
    max_entries: usize,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, InFlight>,
}

impl Cache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(CacheInner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            })),
            default_ttl,
            max_entries,
        }
    }

    fn get_fresh(&self, key: &str) -> Option<ExecResult> {
        let mut guard = self.inner.lock().expect("cache mutex poisoned");
        if let Some(entry) = guard.entries.get_mut(key) {
            if entry.valid() {
                entry.last_accessed = Instant::now();
                let mut result = entry.result.clone();
                result.from_cache = true;
                return Some(result);
            }
        }
        guard.entries.remove(key);
        None
    }

    /// Executes `run` for `key`, honoring cache hit, in-flight dedup, and
    /// insertion-on-success semantics. `ttl` overrides the cache's default
    /// when `Some`.
    pub async fn get_or_run<F, Fut>(
        &self,
        key: String,
        ttl: Option<Duration>,
        cacheable: bool,
        run: F,
    ) -> Result<ExecResult, crate::error::XecError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<ExecResult, crate::error::XecError>>,
    {
        if !cacheable {
            return run().await;
        }

        if let Some(hit) = self.get_fresh(&key) {
            return Ok(hit);
        }

        let notify = {
            let mut guard = self.inner.lock().expect("cache mutex poisoned");
            match guard.in_flight.get(&key) {
                Some(InFlight::Pending(n)) => Some(n.clone()),
                Some(InFlight::Done(result)) => {
                    let mut r = result.clone();
                    r.from_cache = true;
                    return Ok(r);
                }
                None => {
                    guard
                        .in_flight
                        .insert(key.clone(), InFlight::Pending(Arc::new(Notify::new())));
                    None
                }
            }
        };

        if let Some(notify) = notify {
            notify.notified().await;
            if let Some(hit) = self.get_fresh(&key) {
                return Ok(hit);
            }
            // The leader's execution failed (nothing was cached); fall through
            // and race to become the new leader rather than stalling forever.
            return Box::pin(self.get_or_run(key, ttl, cacheable, run)).await;
        }

        let outcome = run().await;

        let mut guard = self.inner.lock().expect("cache mutex poisoned");
        let waiters = match guard.in_flight.remove(&key) {
            Some(InFlight::Pending(n)) => Some(n),
            _ => None,
        };
        if let Ok(ref result) = outcome {
            // Cache the Result regardless of exit code; only transport-level
            // errors (adapter failed to even produce a Result) are excluded.
            self.insert_locked(&mut guard, key.clone(), result.clone(), ttl);
        }
        drop(guard);
        if let Some(notify) = waiters {
            notify.notify_waiters();
        }
        outcome
    }

    fn insert_locked(
        &self,
        guard: &mut CacheInner,
        key: String,
        result: ExecResult,
        ttl: Option<Duration>,
    ) {
        if guard.entries.len() >= self.max_entries && !guard.entries.contains_key(&key) {
            if let Some(oldest_key) = guard
                .entries
                .iter()
                .min_by_key(|(_, v)| v.last_accessed)
                .map(|(k, _)| k.clone())
            {
                guard.entries.remove(&oldest_key);
            }
        }
        guard.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
                last_accessed: Instant::now(),
            },
        );
    }

    /// Removes every entry whose key matches any of `patterns` (substring
    /// match against the cache key's source command line, see
    /// `invalidate_matching`). Exposed separately so callers can pass the
    /// original, human-readable command line rather than the opaque digest.
    pub fn invalidate(&self, keys: &[String]) {
        let mut guard = self.inner.lock().expect("cache mutex poisoned");
        for key in keys {
            guard.entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExitStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fake_result() -> ExecResult {
        ExecResult {
            stdout: b"hi".to_vec(),
            stderr: Vec::new(),
            status: ExitStatus::Code(0),
            duration: Duration::from_millis(1),
            command_line: "echo hi".into(),
            adapter: "local",
            from_cache: false,
        }
    }

    #[tokio::test]
    async fn caches_successful_results() {
        let cache = Cache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            let result = cache
                .get_or_run("k".into(), None, true, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(fake_result())
                })
                .await
                .unwrap();
            assert_eq!(result.stdout, b"hi");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dedupes_concurrent_in_flight_requests() {
        let cache = Cache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_run("shared".into(), None, true, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(fake_result())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_not_served() {
        let cache = Cache::new(10, Duration::from_millis(5));
        cache
            .get_or_run("k".into(), None, true, || async { Ok(fake_result()) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        cache
            .get_or_run("k".into(), None, true, || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(fake_result())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bypasses_cache_when_not_cacheable() {
        let cache = Cache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            cache
                .get_or_run("k".into(), None, false, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(fake_result())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
