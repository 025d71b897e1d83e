use xec_core::config::EngineConfig;
use xec_core::engine::Engine;
use xec_core::pipe::{PipeOptions, PipeTarget, Transform};

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("default config is valid")
}

#[tokio::test]
async fn pipe_two_local_commands_filters_by_line() {
    let engine = engine();
    let source = engine.run(&["printf ", ""], &["a\\nb\\nc\\n".to_string()]);
    let target = engine.run(&["grep b"], &[]);
    let result = source.pipe(PipeTarget::Command(target.command().clone())).run().await.unwrap();
    assert_eq!(result.text(), "b");
    assert!(result.ok());
}

#[tokio::test]
async fn pipe_into_writer_closure_observes_stdout_bytes() {
    let engine = engine();
    let source = engine.run(&["echo ", ""], &["hi".to_string()]);
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let result = source
        .pipe(PipeTarget::Writer(std::sync::Arc::new(move |bytes: &[u8]| {
            seen2.lock().unwrap().extend_from_slice(bytes);
        })))
        .run()
        .await
        .unwrap();
    assert!(result.ok());
    assert_eq!(seen.lock().unwrap().as_slice(), b"hi\n");
}

#[tokio::test]
async fn pipe_into_line_fn_invokes_once_per_nonempty_line() {
    let engine = engine();
    let source = engine.run(&["printf ", ""], &["x\\ny\\n".to_string()]);
    let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let count2 = count.clone();
    source
        .pipe(PipeTarget::LineFn(std::sync::Arc::new(move |_line: &str| {
            count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })))
        .options(PipeOptions::default())
        .run()
        .await
        .unwrap();
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn uppercase_transform_rewrites_stdout() {
    let engine = engine();
    let source = engine.run(&["echo ", ""], &["shout".to_string()]);
    let result = source.pipe(PipeTarget::Transform(Transform::Uppercase)).run().await.unwrap();
    assert_eq!(result.text(), "SHOUT");
}

#[tokio::test]
async fn tee_transform_writes_stdout_to_a_file() {
    let engine = engine();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let source = engine.run(&["echo ", ""], &["teed".to_string()]);
    source
        .pipe(PipeTarget::Transform(Transform::Tee(out.clone())))
        .run()
        .await
        .unwrap();
    let contents = tokio::fs::read_to_string(&out).await.unwrap();
    assert_eq!(contents.trim(), "teed");
}
