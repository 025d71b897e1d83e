use std::time::Duration;

use xec_core::command::CacheOptions;
use xec_core::config::EngineConfig;
use xec_core::engine::Engine;

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("default config is valid")
}

/// Two concurrent cached runs of a command that touches a counter file:
/// only one underlying execution should occur, and both awaiters should
/// see the same stdout.
#[tokio::test]
async fn concurrent_cached_commands_dedupe_to_one_execution() {
    let engine = engine();
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("counter");
    tokio::fs::write(&counter, b"0").await.unwrap();
    let script = format!(
        "n=$(cat {path}); n=$((n+1)); echo -n $n > {path}; sleep 0.1; echo $n",
        path = counter.display()
    );

    let make = || {
        engine
            .run(&["sh -c ", ""], &[script.clone()])
            .cache(CacheOptions { ttl: Some(Duration::from_secs(60)), invalidate_on: vec![] })
    };

    let a = make();
    let b = make();
    let (ra, rb) = tokio::join!(a.output(), b.output());
    let ra = ra.unwrap();
    let rb = rb.unwrap();
    assert_eq!(ra.text(), rb.text());
    let final_count = tokio::fs::read_to_string(&counter).await.unwrap();
    assert_eq!(final_count, "1");
}

#[tokio::test]
async fn uncached_commands_each_run_independently() {
    let engine = engine();
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("counter");
    tokio::fs::write(&counter, b"0").await.unwrap();
    let script = format!(
        "n=$(cat {path}); n=$((n+1)); echo -n $n > {path}",
        path = counter.display()
    );

    let a = engine.run(&["sh -c ", ""], &[script.clone()]);
    let b = engine.run(&["sh -c ", ""], &[script]);
    a.output().await.unwrap();
    b.output().await.unwrap();
    let final_count = tokio::fs::read_to_string(&counter).await.unwrap();
    assert_eq!(final_count, "2");
}
