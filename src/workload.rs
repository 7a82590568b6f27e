//! Reference workloads
//!
//! Two small, deterministic scenarios used by the CLI, the integration tests
//! and the benchmarks:
//!
//! - [`run_countdown`]: N tasks, task `i` counts down from `5 + i % 3` and
//!   finishes at zero.
//! - [`queue_stress`]: producers and consumers hammer a standalone
//!   [`TaskQueue`] and every element is checked off exactly once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::runtime::memory::AllocSnapshot;
use crate::runtime::scheduler::{
    CoroStatus, Coroutine, QueueKind, Runtime, RuntimeConfig, RuntimeError, StatsSnapshot,
    TaskQueue, WorkerContext,
};

/// Countdown task: yields until its counter hits zero.
#[derive(Debug)]
pub struct Countdown {
    id: usize,
    remaining: usize,
    invocations: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl Countdown {
    /// Ticks for task `i`.
    #[inline]
    pub fn ticks_for(i: usize) -> usize {
        5 + i % 3
    }

    pub fn new(
        id: usize,
        ticks: usize,
        invocations: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            id,
            remaining: ticks,
            invocations,
            finished,
        }
    }
}

impl Coroutine for Countdown {
    fn resume(
        &mut self,
        cx: &mut WorkerContext<'_>,
    ) -> CoroStatus {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if cx.is_tracing() {
            tracing::debug!(task = self.id, left = self.remaining, "tick");
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.finished.fetch_add(1, Ordering::Release);
            return CoroStatus::Done;
        }
        CoroStatus::Running
    }
}

/// Outcome of [`run_countdown`].
#[derive(Debug, Clone, Serialize)]
pub struct CountdownReport {
    /// Tasks spawned.
    pub tasks: usize,
    /// Tasks that reported done.
    pub finished: usize,
    /// Step invocations observed by the tasks themselves.
    pub invocations: usize,
    /// Invocations expected from the tick schedule.
    pub expected_invocations: usize,
    /// Wall time of `run`.
    pub elapsed_us: u64,
    /// Final runtime statistics.
    pub stats: StatsSnapshot,
}

impl CountdownReport {
    /// Every task finished after exactly its scheduled number of steps.
    pub fn is_complete(&self) -> bool {
        self.finished == self.tasks && self.invocations == self.expected_invocations
    }
}

/// Spawn `tasks` countdown tasks on a fresh runtime, run it to quiescence and
/// destroy it.
pub fn run_countdown(
    config: RuntimeConfig,
    tasks: usize,
) -> Result<CountdownReport, RuntimeError> {
    let rt = Runtime::with_config(config)?;
    let invocations = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    let mut expected_invocations = 0;
    for i in 0..tasks {
        let ticks = Countdown::ticks_for(i);
        expected_invocations += ticks;
        rt.spawn_named(
            format!("countdown-{}", i),
            Countdown::new(i, ticks, invocations.clone(), finished.clone()),
        );
    }

    let start = Instant::now();
    rt.run()?;
    let elapsed = start.elapsed();
    let stats = rt.destroy();

    Ok(CountdownReport {
        tasks,
        finished: finished.load(Ordering::Acquire),
        invocations: invocations.load(Ordering::Acquire),
        expected_invocations,
        elapsed_us: elapsed.as_micros() as u64,
        stats,
    })
}

/// Parameters for [`queue_stress`].
#[derive(Debug, Clone, Copy)]
pub struct StressConfig {
    pub kind: QueueKind,
    pub capacity: usize,
    pub producers: usize,
    pub consumers: usize,
    /// Elements enqueued in total (each also dequeued once).
    pub elements: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            kind: QueueKind::Locked,
            capacity: 1024,
            producers: 8,
            consumers: 8,
            elements: 100_000,
        }
    }
}

/// Outcome of [`queue_stress`].
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub kind: QueueKind,
    pub enqueued: usize,
    pub dequeued: usize,
    /// Elements seen more than once.
    pub duplicates: usize,
    /// Elements never seen.
    pub missing: usize,
    /// Pushes rejected by a full bounded queue (and retried).
    pub full_retries: usize,
    /// Items left in the queue afterwards.
    pub remaining: usize,
    /// Producer or consumer threads that panicked.
    pub thread_panics: usize,
    pub nodes: AllocSnapshot,
    pub elapsed_us: u64,
}

impl StressReport {
    /// No loss, no duplication, nothing left behind, no leaked nodes.
    pub fn is_clean(&self) -> bool {
        self.thread_panics == 0
            && self.duplicates == 0
            && self.missing == 0
            && self.remaining == 0
            && self.enqueued == self.dequeued
            && self.nodes.is_balanced()
    }
}

/// Run producers and consumers against one queue. Every element carries its
/// index and consumers flip a once-only marker for it.
pub fn queue_stress(config: StressConfig) -> StressReport {
    let producers = config.producers.max(1);
    let consumers = config.consumers.max(1);
    let elements = config.elements;

    let queue = Arc::new(TaskQueue::<usize>::with_kind(config.kind, config.capacity));
    let seen: Arc<Vec<AtomicBool>> = Arc::new((0..elements).map(|_| AtomicBool::new(false)).collect());
    let duplicates = Arc::new(AtomicUsize::new(0));
    let enqueued = Arc::new(AtomicUsize::new(0));
    let dequeued = Arc::new(AtomicUsize::new(0));
    let full_retries = Arc::new(AtomicUsize::new(0));
    let producers_done = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let producer_handles: Vec<_> = (0..producers)
        .map(|p| {
            let queue = queue.clone();
            let enqueued = enqueued.clone();
            let full_retries = full_retries.clone();
            let producers_done = producers_done.clone();
            thread::spawn(move || {
                // Producer p owns elements p, p + producers, p + 2 * producers, ...
                for mut item in (p..elements).step_by(producers) {
                    while let Err(full) = queue.enqueue(item) {
                        item = full.into_inner();
                        full_retries.fetch_add(1, Ordering::Relaxed);
                        thread::yield_now();
                    }
                    enqueued.fetch_add(1, Ordering::AcqRel);
                }
                producers_done.fetch_add(1, Ordering::AcqRel);
            })
        })
        .collect();

    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = queue.clone();
            let seen = seen.clone();
            let duplicates = duplicates.clone();
            let dequeued = dequeued.clone();
            let producers_done = producers_done.clone();
            thread::spawn(move || loop {
                if dequeued.load(Ordering::Acquire) >= elements {
                    break;
                }
                match queue.dequeue() {
                    Some(item) => {
                        if seen[item].swap(true, Ordering::AcqRel) {
                            duplicates.fetch_add(1, Ordering::Relaxed);
                        }
                        dequeued.fetch_add(1, Ordering::AcqRel);
                    }
                    // All producers finished and nothing left: whatever was
                    // not seen by now is lost.
                    None if producers_done.load(Ordering::Acquire) == producers
                        && queue.is_empty() =>
                    {
                        break;
                    }
                    None => thread::sleep(Duration::from_micros(10)),
                }
            })
        })
        .collect();

    let thread_panics = producer_handles
        .into_iter()
        .chain(consumer_handles)
        .map(|handle| handle.join())
        .filter(Result::is_err)
        .count();
    let elapsed = start.elapsed();
    if thread_panics > 0 {
        tracing::error!(count = thread_panics, "queue stress threads panicked");
    }

    let missing = seen.iter().filter(|m| !m.load(Ordering::Acquire)).count();
    let remaining = queue.len();

    StressReport {
        kind: config.kind,
        enqueued: enqueued.load(Ordering::Acquire),
        dequeued: dequeued.load(Ordering::Acquire),
        duplicates: duplicates.load(Ordering::Acquire),
        missing,
        full_retries: full_retries.load(Ordering::Acquire),
        remaining,
        thread_panics,
        nodes: queue.node_stats(),
        elapsed_us: elapsed.as_micros() as u64,
    }
}
