//! TaskQueue 单元测试

use crate::runtime::scheduler::{
    LockFreeQueue, LockedQueue, MpmcQueue, QueueKind, TaskQueue, DEFAULT_QUEUE_CAPACITY,
    MAX_QUEUE_CAPACITY,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

#[test]
fn test_task_queue_basic() {
    let queue: TaskQueue<u32> = TaskQueue::default();
    assert!(queue.is_empty());
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.kind(), QueueKind::Locked);
    assert_eq!(queue.capacity(), None);
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn test_task_queue_fifo() {
    for kind in [QueueKind::Locked, QueueKind::LockFree] {
        let queue = TaskQueue::with_kind(kind, 16);
        for i in 0..10 {
            queue.enqueue(i).unwrap();
        }
        assert_eq!(queue.len(), 10);
        let out: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(out, (0..10).collect::<Vec<_>>(), "kind {}", kind);
        assert!(queue.is_empty());
    }
}

#[test]
fn test_task_queue_interleaved() {
    let queue = TaskQueue::new(DEFAULT_QUEUE_CAPACITY);
    queue.enqueue("a").unwrap();
    queue.enqueue("b").unwrap();
    assert_eq!(queue.dequeue(), Some("a"));
    queue.enqueue("c").unwrap();
    assert_eq!(queue.dequeue(), Some("b"));
    assert_eq!(queue.dequeue(), Some("c"));
    assert_eq!(queue.dequeue(), None);
    // Empty again after draining: tail must be reset too.
    queue.enqueue("d").unwrap();
    assert_eq!(queue.dequeue(), Some("d"));
}

#[test]
fn test_lock_free_queue_full() {
    let queue = LockFreeQueue::new(3);
    assert_eq!(queue.capacity(), 4);
    for i in 0..4 {
        queue.push(i).unwrap();
    }
    let rejected = queue.push(99).unwrap_err();
    assert_eq!(rejected.into_inner(), 99);
    assert_eq!(queue.pop(), Some(0));
    queue.push(4).unwrap();
    assert_eq!(queue.len(), 4);
}

#[test]
fn test_lock_free_capacity_is_clamped() {
    assert_eq!(LockFreeQueue::<u8>::new(0).capacity(), 2);
    assert_eq!(LockFreeQueue::<u8>::new(1000).capacity(), 1024);
    assert_eq!(LockFreeQueue::<u8>::new(usize::MAX).capacity(), MAX_QUEUE_CAPACITY);
    assert_eq!(LockFreeQueue::<u8>::new(MAX_QUEUE_CAPACITY + 1).capacity(), MAX_QUEUE_CAPACITY);
}

#[test]
fn test_locked_queue_never_full() {
    let queue = LockedQueue::new();
    for i in 0..5000 {
        MpmcQueue::push(&queue, i).unwrap();
    }
    assert_eq!(MpmcQueue::len(&queue), 5000);
    assert_eq!(MpmcQueue::capacity(&queue), None);
}

#[test]
fn test_node_stats_balance() {
    let queue = TaskQueue::with_kind(QueueKind::Locked, 0);
    for i in 0..100 {
        queue.enqueue(i).unwrap();
    }
    let mid = queue.node_stats();
    assert_eq!(mid.allocations, 100);
    assert_eq!(mid.outstanding(), 100);

    for _ in 0..60 {
        queue.dequeue();
    }
    assert_eq!(queue.node_stats().outstanding(), 40);

    let rest = queue.drain();
    assert_eq!(rest.len(), 40);
    assert_eq!(rest[0], 60);
    assert!(queue.node_stats().is_balanced());
}

#[test]
fn test_destroy_returns_payloads() {
    let queue = TaskQueue::new(8);
    queue.enqueue(String::from("left")).unwrap();
    queue.enqueue(String::from("over")).unwrap();
    let rest = queue.destroy();
    assert_eq!(rest, vec!["left".to_string(), "over".to_string()]);
}

#[test]
fn test_drop_releases_payloads() {
    let marker = Arc::new(());
    {
        let queue = TaskQueue::new(8);
        for _ in 0..5 {
            queue.enqueue(marker.clone()).unwrap();
        }
        assert_eq!(Arc::strong_count(&marker), 6);
    }
    assert_eq!(Arc::strong_count(&marker), 1);
}

#[test]
fn test_concurrent_exactly_once() {
    for kind in [QueueKind::Locked, QueueKind::LockFree] {
        let queue = Arc::new(TaskQueue::with_kind(kind, 64));
        let total = 4 * 2_000;
        let sum = Arc::new(AtomicUsize::new(0));
        let count = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..2_000 {
                        let mut item = p * 2_000 + i;
                        while let Err(full) = queue.enqueue(item) {
                            item = full.into_inner();
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let sum = sum.clone();
                let count = count.clone();
                thread::spawn(move || {
                    while count.load(Ordering::Acquire) < total {
                        match queue.dequeue() {
                            Some(item) => {
                                sum.fetch_add(item, Ordering::Relaxed);
                                count.fetch_add(1, Ordering::AcqRel);
                            }
                            None => thread::yield_now(),
                        }
                    }
                })
            })
            .collect();

        for handle in producers.into_iter().chain(consumers) {
            handle.join().unwrap();
        }

        assert_eq!(count.load(Ordering::Acquire), total, "kind {}", kind);
        assert_eq!(sum.load(Ordering::Acquire), (0..total).sum::<usize>());
        assert!(queue.is_empty());
    }
}

#[derive(Debug, Clone)]
enum Op {
    Push(u16),
    Pop,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u16>().prop_map(Op::Push), Just(Op::Pop)]
}

proptest! {
    /// Single-threaded, the locked queue behaves exactly like a VecDeque.
    #[test]
    fn prop_locked_queue_matches_model(ops in proptest::collection::vec(op_strategy(), 0..200)) {
        let queue = TaskQueue::with_kind(QueueKind::Locked, 0);
        let mut model = VecDeque::new();
        for op in ops {
            match op {
                Op::Push(v) => {
                    queue.enqueue(v).unwrap();
                    model.push_back(v);
                }
                Op::Pop => prop_assert_eq!(queue.dequeue(), model.pop_front()),
            }
            prop_assert_eq!(queue.len(), model.len());
        }
        prop_assert_eq!(queue.node_stats().outstanding(), model.len());
    }

    /// The bounded ring matches a model that refuses pushes past capacity.
    #[test]
    fn prop_lock_free_queue_matches_model(ops in proptest::collection::vec(op_strategy(), 0..200)) {
        let queue = TaskQueue::with_kind(QueueKind::LockFree, 8);
        let mut model = VecDeque::new();
        for op in ops {
            match op {
                Op::Push(v) => {
                    let accepted = queue.enqueue(v).is_ok();
                    prop_assert_eq!(accepted, model.len() < 8);
                    if accepted {
                        model.push_back(v);
                    }
                }
                Op::Pop => prop_assert_eq!(queue.dequeue(), model.pop_front()),
            }
        }
        prop_assert_eq!(queue.len(), model.len());
    }
}
