use std::time::{Duration, Instant};

use xec_core::command::CommandBuilder;
use xec_core::config::EngineConfig;
use xec_core::engine::Engine;
use xec_core::parallel::ParallelOptions;

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("default config is valid")
}

#[tokio::test]
async fn bounded_parallel_respects_max_concurrency_in_wall_time() {
    let engine = engine();
    let commands: Vec<_> = (0..10)
        .map(|_| CommandBuilder::new("sleep", vec!["0.1".to_string()]).build())
        .collect();
    let started = Instant::now();
    let results = engine
        .parallel_settled(commands, ParallelOptions { max_concurrency: 3, ..Default::default() })
        .await;
    let elapsed = started.elapsed();
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.ok));
    // ceil(10/3) batches of ~100ms each, with slack for process spawn overhead.
    assert!(elapsed >= Duration::from_millis(350));
}

#[tokio::test]
async fn settled_never_throws_and_reports_one_outcome_per_input() {
    let engine = engine();
    let commands = vec![
        CommandBuilder::new("true", vec![]).build(),
        CommandBuilder::new("false", vec![]).nothrow().build(),
        CommandBuilder::new("does-not-exist-xyz", vec![]).build(),
    ];
    let results = engine.parallel_settled(commands, ParallelOptions::default()).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].ok);
    assert!(results[1].ok);
    assert!(!results[2].ok);
    assert!(results[2].error.is_some());
}

#[tokio::test]
async fn stop_on_error_cancels_remaining_items() {
    let engine = engine();
    let commands = vec![
        CommandBuilder::new("false", vec![]).build(),
        CommandBuilder::new("sleep", vec!["0.3".to_string()]).build(),
        CommandBuilder::new("sleep", vec!["0.3".to_string()]).build(),
    ];
    let results = engine
        .parallel_settled(
            commands,
            ParallelOptions { max_concurrency: 1, stop_on_error: true, ..Default::default() },
        )
        .await;
    assert_eq!(results.len(), 3);
    assert!(!results[0].ok);
    assert!(!results[1].ok || !results[2].ok);
}

#[tokio::test]
async fn progress_callback_reports_total_completions() {
    let engine = engine();
    let commands: Vec<_> = (0..4).map(|_| CommandBuilder::new("true", vec![]).build()).collect();
    let seen_max = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen_max2 = seen_max.clone();
    let options = ParallelOptions {
        on_progress: Some(std::sync::Arc::new(move |done, _total| {
            seen_max2.fetch_max(done, std::sync::atomic::Ordering::SeqCst);
        })),
        ..Default::default()
    };
    engine.parallel_settled(commands, options).await;
    assert_eq!(seen_max.load(std::sync::atomic::Ordering::SeqCst), 4);
}
