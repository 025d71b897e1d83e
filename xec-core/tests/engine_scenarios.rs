//! End-to-end scenarios against the real local adapter (spawns `/bin/sh`
//! family processes). One file per concern, matching the unit-test split
//! inside `src/`.

use std::time::Duration;

use xec_core::config::EngineConfig;
use xec_core::engine::Engine;
use xec_core::error::XecError;

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("default config is valid")
}

#[tokio::test]
async fn local_echo_preserves_spaces_without_shell_quoting() {
    let engine = engine();
    let result = engine
        .run(&["echo ", ""], &["hello world".to_string()])
        .output()
        .await
        .unwrap();
    assert_eq!(result.text(), "hello world");
    assert!(result.ok());
}

#[tokio::test]
async fn nothrow_on_non_zero_exit_reports_without_throwing() {
    let engine = engine();
    let result = engine.run(&["false"], &[]).nothrow().output().await.unwrap();
    assert!(!result.ok());
    assert_eq!(result.status.code(), Some(1));
}

#[tokio::test]
async fn timeout_raises_and_stays_within_grace() {
    let engine = engine();
    let object = engine.run(&["sleep 5"], &[]).timeout(Duration::from_millis(200), None);
    let started = std::time::Instant::now();
    let result = object.output().await;
    let elapsed = started.elapsed();
    assert!(matches!(result, Err(XecError::Timeout { .. })));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed <= Duration::from_millis(2200));
}

#[tokio::test]
async fn never_awaited_command_object_never_spawns() {
    let engine = engine();
    // Building and dropping a Command Object with no terminal call must not
    // run anything; there is nothing observable to assert on except that
    // this does not hang or panic, so the test simply exercises the path.
    let _object = engine.run(&["sleep 5"], &[]);
}

#[tokio::test]
async fn concurrent_awaiters_of_one_command_object_share_one_run() {
    let engine = engine();
    let object = engine.run(&["echo ", ""], &["once".to_string()]);
    let a = object.clone();
    let b = object.clone();
    let (ra, rb) = tokio::join!(a.output(), b.output());
    assert_eq!(ra.unwrap().text(), "once");
    assert_eq!(rb.unwrap().text(), "once");
}

#[tokio::test]
async fn cd_then_cd_resolves_against_the_prior_directory() {
    let engine = engine();
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    tokio::fs::create_dir(&sub).await.unwrap();
    let marker = sub.join("marker");
    tokio::fs::write(&marker, b"x").await.unwrap();

    let derived = engine.cd(dir.path().display().to_string()).cd("sub");
    let result = derived.run(&["ls"], &[]).output().await.unwrap();
    assert!(result.text().contains("marker"));
}

#[tokio::test]
async fn env_merges_with_later_keys_winning() {
    let engine = engine();
    let first = engine.env([("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]);
    let second = first.env([("B".to_string(), "3".to_string())]);
    let result = second
        .run(&["sh -c ", ""], &["echo $A:$B".to_string()])
        .output()
        .await
        .unwrap();
    assert_eq!(result.text(), "1:3");
}

#[tokio::test]
async fn raw_dispatches_through_a_shell_so_pipes_work() {
    let engine = engine();
    let result = engine
        .raw(&["printf 'a\\nb\\nc\\n' | grep b"], &[])
        .output()
        .await
        .unwrap();
    assert_eq!(result.text(), "b");
}

#[tokio::test]
async fn kill_before_first_await_prevents_the_process_from_starting() {
    let engine = engine();
    let marker = tempfile::NamedTempFile::new().unwrap();
    let marker_path = marker.path().display().to_string();
    std::fs::remove_file(&marker_path).ok();

    let script = format!("sleep 1; touch {marker_path}");
    let object = engine.run(&["sh -c ", ""], &[script]);
    object.kill("SIGTERM");
    let result = object.output().await;
    assert!(matches!(result, Err(XecError::Cancelled { .. })));
    assert!(!std::path::Path::new(&marker_path).exists());
}

#[tokio::test]
async fn dispose_is_idempotent() {
    let engine = engine();
    engine.dispose().await.unwrap();
    engine.dispose().await.unwrap();
}
