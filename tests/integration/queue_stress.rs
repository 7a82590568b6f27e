use corun::workload::{queue_stress, StressConfig};
use corun::{QueueKind, TaskQueue};

#[test]
fn test_locked_queue_stress() {
    let report = queue_stress(StressConfig::default());

    assert_eq!(report.enqueued, 100_000);
    assert_eq!(report.dequeued, 100_000);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.missing, 0);
    assert_eq!(report.remaining, 0);
    assert_eq!(report.full_retries, 0);
    assert_eq!(report.thread_panics, 0);
    assert_eq!(report.nodes.allocations, 100_000);
    assert_eq!(report.nodes.frees, 100_000);
    assert!(report.is_clean());
}

#[test]
fn test_lock_free_queue_stress() {
    let report = queue_stress(StressConfig {
        kind: QueueKind::LockFree,
        capacity: 64,
        ..StressConfig::default()
    });

    assert_eq!(report.enqueued, 100_000);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.missing, 0);
    assert_eq!(report.remaining, 0);
    assert!(report.is_clean(), "{:?}", report);
}

#[test]
fn test_stress_uneven_threads() {
    let report = queue_stress(StressConfig {
        producers: 3,
        consumers: 5,
        elements: 10_007,
        ..StressConfig::default()
    });
    assert!(report.is_clean(), "{:?}", report);
}

#[test]
fn test_single_producer_fifo() {
    use std::sync::Arc;
    use std::thread;

    for kind in [QueueKind::Locked, QueueKind::LockFree] {
        let queue = Arc::new(TaskQueue::with_kind(kind, 32));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..20_000usize {
                    let mut item = i;
                    while let Err(full) = queue.enqueue(item) {
                        item = full.into_inner();
                        thread::yield_now();
                    }
                }
            })
        };

        let mut last = None;
        let mut received = 0;
        while received < 20_000 {
            if let Some(item) = queue.dequeue() {
                if let Some(prev) = last {
                    assert!(item > prev, "{}: {} after {}", kind, item, prev);
                }
                last = Some(item);
                received += 1;
            }
        }
        producer.join().unwrap();
        assert!(queue.is_empty());
    }
}
