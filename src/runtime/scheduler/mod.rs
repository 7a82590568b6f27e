//! Cooperative task scheduler
//!
//! A [`Runtime`] owns a fixed pool of worker threads and one global
//! [`TaskQueue`]. Tasks are step functions ([`Coroutine`]) that yield by
//! returning [`CoroStatus::Running`] and finish by returning
//! [`CoroStatus::Done`]. Workers pull a task, run one step, and either queue
//! it again or drop it.
//!
//! Each worker also owns a local queue. A step can push follow-up work there
//! with [`WorkerContext::spawn_local`]; idle workers steal from the local
//! queues of busy ones, so local work is never stranded.
//!
//! ```no_run
//! use corun::runtime::scheduler::{CoroStatus, Runtime};
//!
//! let rt = Runtime::new(4).unwrap();
//! for i in 0..8 {
//!     let mut remaining = 5 + i % 3;
//!     rt.spawn(move |_cx| {
//!         remaining -= 1;
//!         if remaining == 0 {
//!             CoroStatus::Done
//!         } else {
//!             CoroStatus::Running
//!         }
//!     });
//! }
//! rt.run().unwrap();
//! rt.destroy();
//! ```

pub mod queue;
pub mod task;
pub mod worker;

#[cfg(test)]
mod tests;

pub use queue::{
    LockFreeQueue, LockedQueue, MpmcQueue, QueueFull, QueueKind, TaskQueue, DEFAULT_QUEUE_CAPACITY,
    MAX_QUEUE_CAPACITY,
};
pub use task::{CancelToken, CoroStatus, Coroutine, Task, TaskBuilder, TaskId, TaskIdGenerator};
pub use worker::{WorkerContext, WorkerState, TRACE_TARGET};

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use crossbeam::deque::{Stealer, Worker as LocalQueue};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::runtime::memory::AllocSnapshot;

/// Polls between forced looks at the spill list.
const OVERFLOW_POLL_INTERVAL: u32 = 31;

/// What workers do with queued work once a stop is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownPolicy {
    /// Keep running tasks until the queue is empty.
    #[default]
    Drain,
    /// Exit right away; whatever is still queued is dropped at destroy.
    Abandon,
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads. 0 means one per available CPU.
    pub num_workers: usize,
    /// Backing strategy of the global queue.
    pub queue_kind: QueueKind,
    /// Capacity hint for the global queue (binding for the lock-free ring).
    pub queue_capacity: usize,
    /// How long an idle worker sleeps once its spin backoff is exhausted,
    /// in microseconds.
    pub idle_timeout_us: u64,
    /// Emit per-step trace records from the start.
    pub tracing: bool,
    /// Shutdown behavior.
    pub shutdown_policy: ShutdownPolicy,
    /// Worker thread name prefix; the worker index is appended.
    pub thread_name: String,
    /// Worker thread stack size in bytes. `None` keeps the platform default.
    pub stack_size: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            queue_kind: QueueKind::Locked,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout_us: 1_000,
            tracing: false,
            shutdown_policy: ShutdownPolicy::Drain,
            thread_name: "corun-worker".to_string(),
            stack_size: None,
        }
    }
}

impl RuntimeConfig {
    /// Default configuration with a fixed worker count.
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    /// Worker count with 0 resolved to the available parallelism.
    pub fn resolved_workers(&self) -> usize {
        if self.num_workers > 0 {
            return self.num_workers;
        }
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Idle sleep as a duration.
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_micros(self.idle_timeout_us)
    }
}

/// Runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A worker thread could not be created.
    #[error("failed to spawn worker thread {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },
    /// The runtime was used in a way that can never complete.
    #[error("invalid runtime state: {0}")]
    InvalidState(&'static str),
}

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    /// Total tasks spawned.
    pub tasks_spawned: AtomicUsize,
    /// Tasks that returned `Done`.
    pub tasks_completed: AtomicUsize,
    /// Tasks discarded because a step panicked.
    pub tasks_panicked: AtomicUsize,
    /// Step invocations.
    pub steps_executed: AtomicUsize,
    /// Steps that returned `Running`.
    pub yields: AtomicUsize,
    /// Yields resumed in place because the bounded queue was full.
    pub inline_resumes: AtomicUsize,
    /// Tasks that spilled past a full bounded queue (spawns and yields).
    pub overflow_spawns: AtomicUsize,
    /// Tasks spawned onto a worker's local queue.
    pub local_spawns: AtomicUsize,
    /// Tasks taken from another worker's local queue.
    pub tasks_stolen: AtomicUsize,
    /// Times a worker slept for lack of work.
    pub idle_backoffs: AtomicUsize,
    /// Steps executed with tracing on.
    pub traced_steps: AtomicUsize,
    /// Total step time in microseconds.
    pub total_exec_time_us: AtomicUsize,
    /// Peak number of concurrently executing steps.
    pub peak_parallelism: AtomicUsize,
}

impl RuntimeStats {
    /// Record a spawned task.
    #[inline]
    pub fn record_spawned(&self) {
        self.tasks_spawned.fetch_add(1, Ordering::SeqCst);
    }

    /// Take back a spawn whose enqueue was refused.
    #[inline]
    pub fn retract_spawned(&self) {
        self.tasks_spawned.fetch_sub(1, Ordering::SeqCst);
    }

    /// Record a completed task.
    #[inline]
    pub fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a task discarded after a panic.
    #[inline]
    pub fn record_panicked(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::SeqCst);
    }

    /// Record one step.
    #[inline]
    pub fn record_step(
        &self,
        duration_us: usize,
    ) {
        self.steps_executed.fetch_add(1, Ordering::SeqCst);
        self.total_exec_time_us
            .fetch_add(duration_us, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_inline_resume(&self) {
        self.inline_resumes.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_overflow(&self) {
        self.overflow_spawns.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_local_spawn(&self) {
        self.local_spawns.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_steal(&self) {
        self.tasks_stolen.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_idle(&self) {
        self.idle_backoffs.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_traced(&self) {
        self.traced_steps.fetch_add(1, Ordering::SeqCst);
    }

    /// Update parallelism.
    #[inline]
    pub fn update_parallelism(
        &self,
        current: usize,
    ) {
        loop {
            let peak = self.peak_parallelism.load(Ordering::SeqCst);
            if current <= peak {
                break;
            }
            if self
                .peak_parallelism
                .compare_exchange(peak, current, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_spawned: self.tasks_spawned.load(Ordering::SeqCst),
            tasks_completed: self.tasks_completed.load(Ordering::SeqCst),
            tasks_panicked: self.tasks_panicked.load(Ordering::SeqCst),
            steps_executed: self.steps_executed.load(Ordering::SeqCst),
            yields: self.yields.load(Ordering::SeqCst),
            inline_resumes: self.inline_resumes.load(Ordering::SeqCst),
            overflow_spawns: self.overflow_spawns.load(Ordering::SeqCst),
            local_spawns: self.local_spawns.load(Ordering::SeqCst),
            tasks_stolen: self.tasks_stolen.load(Ordering::SeqCst),
            idle_backoffs: self.idle_backoffs.load(Ordering::SeqCst),
            traced_steps: self.traced_steps.load(Ordering::SeqCst),
            total_exec_time_us: self.total_exec_time_us.load(Ordering::SeqCst),
            peak_parallelism: self.peak_parallelism.load(Ordering::SeqCst),
            queue_nodes: AllocSnapshot::default(),
        }
    }
}

/// Point-in-time copy of [`RuntimeStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tasks_spawned: usize,
    pub tasks_completed: usize,
    pub tasks_panicked: usize,
    pub steps_executed: usize,
    pub yields: usize,
    pub inline_resumes: usize,
    pub overflow_spawns: usize,
    pub local_spawns: usize,
    pub tasks_stolen: usize,
    pub idle_backoffs: usize,
    pub traced_steps: usize,
    pub total_exec_time_us: usize,
    pub peak_parallelism: usize,
    /// Node wrapper accounting of the global queue.
    pub queue_nodes: AllocSnapshot,
}

/// State shared by the runtime handle and every worker.
pub(crate) struct Shared {
    config: RuntimeConfig,
    queue: TaskQueue<Task>,
    /// Unbounded spill list for spawns that found the bounded queue full.
    overflow: LockedQueue<Task>,
    /// Steal handles for every worker's local queue, indexed by worker id.
    stealers: Vec<Stealer<Task>>,
    ids: TaskIdGenerator,
    stats: RuntimeStats,
    tracing: AtomicBool,
    stop: AtomicBool,
    /// Start latch: workers wait here until `start` or a stop request.
    started: Mutex<bool>,
    start_cv: Condvar,
    /// Tasks spawned and not yet discarded (queued or executing).
    live: AtomicUsize,
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
    /// Steps currently executing.
    executing: AtomicUsize,
}

impl Shared {
    fn new(
        config: RuntimeConfig,
        stealers: Vec<Stealer<Task>>,
    ) -> Self {
        let queue = TaskQueue::with_kind(config.queue_kind, config.queue_capacity);
        let tracing = AtomicBool::new(config.tracing);
        Self {
            config,
            queue,
            overflow: LockedQueue::new(),
            stealers,
            ids: TaskIdGenerator::new(),
            stats: RuntimeStats::default(),
            tracing,
            stop: AtomicBool::new(false),
            started: Mutex::new(false),
            start_cv: Condvar::new(),
            live: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
            executing: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn is_tracing(&self) -> bool {
        self.tracing.load(Ordering::Relaxed)
    }

    #[inline]
    fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Block until the runtime is started or stopped.
    fn wait_for_start(&self) {
        let mut started = self.started.lock();
        while !*started && !self.is_stopping() {
            self.start_cv.wait(&mut started);
        }
    }

    fn start(&self) {
        let mut started = self.started.lock();
        if !*started {
            *started = true;
            self.start_cv.notify_all();
        }
    }

    fn request_stop(&self) {
        let _started = self.started.lock();
        self.stop.store(true, Ordering::Release);
        self.start_cv.notify_all();
    }

    /// Count a new task and queue it. A full bounded queue spills into the
    /// overflow list, so spawning never waits on the workers.
    fn spawn_task(
        &self,
        task: Task,
    ) -> TaskId {
        let id = task.id();
        self.live.fetch_add(1, Ordering::AcqRel);
        self.stats.record_spawned();

        if let Err(full) = self.queue.enqueue(task) {
            self.stats.record_overflow();
            self.overflow.push(full.into_inner());
        }
        id
    }

    /// Count a new task and push it onto the calling worker's local queue.
    fn spawn_local_task(
        &self,
        local: &LocalQueue<Task>,
        task: Task,
    ) -> TaskId {
        let id = task.id();
        self.live.fetch_add(1, Ordering::AcqRel);
        self.stats.record_spawned();
        self.stats.record_local_spawn();
        local.push(task);
        id
    }

    /// Queue a yielded task again. Past a full ring it goes to the spill
    /// list, never back to the caller.
    fn requeue(
        &self,
        task: Task,
    ) {
        if let Err(full) = self.queue.enqueue(task) {
            self.stats.record_overflow();
            self.overflow.push(full.into_inner());
        }
    }

    /// Next task from the global side: the ring, then the spill list. Every
    /// `OVERFLOW_POLL_INTERVAL`th poll looks at the spill list first, so
    /// tasks cycling through a busy ring cannot starve it.
    fn pop_global(
        &self,
        tick: u32,
    ) -> Option<Task> {
        if tick % OVERFLOW_POLL_INTERVAL == 0 {
            if let Some(task) = self.overflow.pop() {
                return Some(task);
            }
        }
        self.queue.dequeue().or_else(|| self.overflow.pop())
    }

    fn try_spawn_task(
        &self,
        task: Task,
    ) -> Result<TaskId, QueueFull<Task>> {
        let id = task.id();
        self.live.fetch_add(1, Ordering::AcqRel);
        self.stats.record_spawned();
        match self.queue.enqueue(task) {
            Ok(()) => Ok(id),
            Err(full) => {
                self.stats.retract_spawned();
                self.task_discarded();
                Err(full)
            }
        }
    }

    /// A task left the system (finished, panicked, or dropped at shutdown).
    fn task_discarded(&self) {
        if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle_lock.lock();
            self.idle_cv.notify_all();
        }
    }

    /// Block until no task is queued or executing.
    fn wait_quiescent(&self) {
        let mut guard = self.idle_lock.lock();
        while self.live.load(Ordering::Acquire) != 0 {
            self.idle_cv.wait(&mut guard);
        }
    }

    #[inline]
    fn enter_step(&self) -> usize {
        self.executing.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    fn exit_step(&self) {
        self.executing.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The task runtime: a fixed worker pool around one global queue.
///
/// Lifecycle: create ([`Runtime::new`] / [`Runtime::with_config`]) → spawn →
/// [`Runtime::run`] (blocks until quiescent, may be repeated) →
/// [`Runtime::destroy`]. `destroy` takes the runtime by value, so it cannot
/// overlap a `run` on another thread; sharing the runtime means wrapping it
/// in an `Arc` and reclaiming it with `Arc::try_unwrap` first.
pub struct Runtime {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.workers.len())
            .field("queue", &self.shared.queue)
            .field("pending", &self.pending())
            .field("tracing", &self.is_tracing())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime with `num_workers` threads (0 = one per CPU).
    #[inline]
    pub fn new(num_workers: usize) -> Result<Self, RuntimeError> {
        Self::with_config(RuntimeConfig::with_workers(num_workers))
    }

    /// Create a runtime with custom configuration.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.num_workers = config.resolved_workers();
        let num_workers = config.num_workers;

        debug!(
            workers = num_workers,
            queue = %config.queue_kind,
            capacity = config.queue_capacity,
            "creating runtime"
        );

        let locals: Vec<LocalQueue<Task>> = (0..num_workers)
            .map(|_| LocalQueue::new_fifo())
            .collect();
        let stealers = locals.iter().map(LocalQueue::stealer).collect();

        let shared = Arc::new(Shared::new(config, stealers));
        let workers = Self::spawn_workers(locals, &shared)?;

        Ok(Self { shared, workers })
    }

    /// Spawn worker threads.
    fn spawn_workers(
        locals: Vec<LocalQueue<Task>>,
        shared: &Arc<Shared>,
    ) -> Result<Vec<thread::JoinHandle<()>>, RuntimeError> {
        let mut workers = Vec::with_capacity(locals.len());

        for (worker_id, local) in locals.into_iter().enumerate() {
            let shared_for_worker = shared.clone();

            let mut builder =
                thread::Builder::new().name(format!("{}-{}", shared.config.thread_name, worker_id));
            if let Some(stack_size) = shared.config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder.spawn(move || {
                worker::worker_loop(worker_id, local, &shared_for_worker);
            });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    // Unwind the workers already running before reporting.
                    shared.request_stop();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(RuntimeError::Spawn {
                        worker: worker_id,
                        source,
                    });
                }
            }
        }

        Ok(workers)
    }

    /// Spawn a closure as a task on the global queue.
    pub fn spawn<F>(
        &self,
        step: F,
    ) -> TaskId
    where
        F: FnMut(&mut WorkerContext<'_>) -> CoroStatus + Send + 'static,
    {
        self.spawn_global(step)
    }

    /// Spawn a coroutine on the global queue. Fire-and-forget: the returned
    /// ID is only for correlating trace records.
    pub fn spawn_global<C: Coroutine>(
        &self,
        body: C,
    ) -> TaskId {
        let task = Task::new(self.shared.ids.next(), body);
        self.shared.spawn_task(task)
    }

    /// Spawn a named coroutine.
    pub fn spawn_named<C: Coroutine>(
        &self,
        name: impl Into<String>,
        body: C,
    ) -> TaskId {
        let task = TaskBuilder::new()
            .name(name)
            .build(self.shared.ids.next(), body);
        self.shared.spawn_task(task)
    }

    /// Spawn without retrying: a full bounded queue hands the task back.
    pub fn try_spawn<C: Coroutine>(
        &self,
        body: C,
    ) -> Result<TaskId, QueueFull<Task>> {
        let task = Task::new(self.shared.ids.next(), body);
        self.shared.try_spawn_task(task)
    }

    /// Toggle per-step trace records. Workers pick the change up on their
    /// next step; scheduling is unaffected.
    pub fn set_tracing(
        &self,
        enabled: bool,
    ) {
        self.shared.tracing.store(enabled, Ordering::Relaxed);
    }

    /// Whether tracing is on.
    #[inline]
    pub fn is_tracing(&self) -> bool {
        self.shared.is_tracing()
    }

    /// Let workers start pulling tasks without waiting for quiescence.
    pub fn start(&self) {
        self.shared.start();
    }

    /// Start the workers if needed and block until quiescent: nothing queued
    /// and nothing executing.
    ///
    /// Calling this from one of the runtime's own tasks would wait for the
    /// caller itself, so it is rejected.
    pub fn run(&self) -> Result<(), RuntimeError> {
        if worker::is_worker_of(&self.shared) {
            return Err(RuntimeError::InvalidState(
                "run() called from a task of the same runtime",
            ));
        }
        self.shared.start();
        self.shared.wait_quiescent();
        debug!(stats = ?self.shared.stats.snapshot(), "runtime quiescent");
        Ok(())
    }

    /// Tasks spawned and not yet finished.
    #[inline]
    pub fn pending(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Number of worker threads.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.shared.config.num_workers
    }

    /// Effective configuration.
    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.shared.stats.snapshot();
        snapshot.queue_nodes = self.shared.queue.node_stats();
        snapshot
    }

    /// Stop and join the workers, release the queue, and report final
    /// statistics.
    pub fn destroy(mut self) -> StatsSnapshot {
        self.shutdown();
        self.stats()
    }

    fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        debug!(workers = self.workers.len(), "stopping runtime");
        self.shared.request_stop();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }

        let mut abandoned = self.shared.queue.drain();
        while let Some(task) = self.shared.overflow.pop() {
            abandoned.push(task);
        }
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "dropping tasks still queued at shutdown");
            for task in abandoned {
                drop(task);
                self.shared.task_discarded();
            }
        }

        debug!(nodes = ?self.shared.queue.node_stats(), "runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
