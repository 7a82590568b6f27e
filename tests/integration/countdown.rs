use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use corun::workload::{run_countdown, Countdown};
use corun::{CoroStatus, QueueKind, Runtime, RuntimeConfig};

#[test]
fn test_countdown_eight_tasks_four_workers() {
    let report = run_countdown(RuntimeConfig::with_workers(4), 8).unwrap();

    assert_eq!(report.finished, 8);
    // 5 + i % 3 for i in 0..8: 5, 6, 7, 5, 6, 7, 5, 6
    assert_eq!(report.expected_invocations, 47);
    assert_eq!(report.invocations, 47);
    assert!(report.is_complete());

    let stats = &report.stats;
    assert_eq!(stats.tasks_spawned, 8);
    assert_eq!(stats.tasks_completed, 8);
    assert_eq!(stats.steps_executed, 47);
    assert_eq!(stats.traced_steps, 0);
    assert!(stats.peak_parallelism <= 4);
    assert!(stats.queue_nodes.is_balanced());
}

#[test]
fn test_countdown_traced() {
    let config = RuntimeConfig {
        num_workers: 2,
        tracing: true,
        ..RuntimeConfig::default()
    };
    let report = run_countdown(config, 8).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.stats.traced_steps, report.stats.steps_executed);
}

#[test]
fn test_countdown_on_lock_free_queue() {
    let config = RuntimeConfig {
        num_workers: 4,
        queue_kind: QueueKind::LockFree,
        queue_capacity: 16,
        ..RuntimeConfig::default()
    };
    let report = run_countdown(config, 200).unwrap();
    assert!(report.is_complete(), "{:?}", report);
    assert_eq!(report.stats.tasks_completed, 200);
}

#[test]
fn test_countdown_single_worker() {
    let report = run_countdown(RuntimeConfig::with_workers(1), 3).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.stats.peak_parallelism, 1);
}

#[test]
fn test_empty_runtime_lifecycle() {
    let rt = Runtime::new(4).unwrap();
    rt.run().unwrap();
    let stats = rt.destroy();
    assert_eq!(stats.tasks_spawned, 0);
    assert_eq!(stats.queue_nodes.allocations, stats.queue_nodes.frees);
}

#[test]
fn test_countdown_coroutine_spawned_from_tasks() {
    let rt = Runtime::new(4).unwrap();
    let invocations = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    for i in 0..4 {
        let invocations = invocations.clone();
        let finished = finished.clone();
        rt.spawn(move |cx| {
            cx.spawn_named(
                format!("child-{}", i),
                Countdown::new(i, Countdown::ticks_for(i), invocations.clone(), finished.clone()),
            );
            CoroStatus::Done
        });
    }
    rt.run().unwrap();

    assert_eq!(finished.load(Ordering::SeqCst), 4);
    assert_eq!(invocations.load(Ordering::SeqCst), 5 + 6 + 7 + 5);
    let stats = rt.destroy();
    assert_eq!(stats.tasks_completed, 8);
    assert!(stats.queue_nodes.is_balanced());
}
