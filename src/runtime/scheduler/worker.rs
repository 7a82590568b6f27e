//! Worker threads and their per-thread context.
//!
//! Each worker runs the same loop: find a task, run one step, queue it again
//! on the global queue if it yielded or drop it if it finished. Tasks are
//! looked up in this order:
//!
//! 1. every `GLOBAL_POLL_INTERVAL`th poll, the global side first;
//! 2. the worker's own local queue (filled by [`WorkerContext::spawn_local`]);
//! 3. the global queue, then its spill list;
//! 4. the other workers' local queues, stealing a batch.
//!
//! Nothing found is met with a spin/snooze backoff and then a short sleep;
//! no queue ever blocks.
//!
//! ```text
//! Init ──▶ Polling ──▶ Executing ──▶ Polling
//!             │
//!             └──(stop flag set, queue empty)──▶ Shutdown
//! ```

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use crossbeam::deque::{Steal, Worker as LocalQueue};
use crossbeam::utils::Backoff;
use tracing::{error, info, trace, warn};

use super::task::{CoroStatus, Coroutine, Task, TaskBuilder, TaskId};
use super::{Shared, ShutdownPolicy};

/// Target used for per-step trace records.
pub const TRACE_TARGET: &str = "corun::trace";

/// Polls between forced looks at the global side.
const GLOBAL_POLL_INTERVAL: u32 = 61;

/// Yields resumed in place on a full ring before spilling the task.
const INLINE_RESUME_LIMIT: usize = 8;

thread_local! {
    /// Address of the runtime this thread works for, 0 on non-worker threads.
    static WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

/// Whether the calling thread is a worker of the runtime at `shared`.
pub(super) fn is_worker_of(shared: &Shared) -> bool {
    WORKER_OF.with(|w| w.get() == shared as *const Shared as usize)
}

/// Worker loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Thread started, waiting for the runtime to start.
    Init,
    /// Looking for work.
    Polling,
    /// Running a task step.
    Executing,
    /// Exited the loop.
    Shutdown,
}

/// Per-worker execution context handed to every step.
///
/// Borrows the runtime's shared state; it cannot outlive the worker thread,
/// which in turn never outlives the runtime.
pub struct WorkerContext<'rt> {
    worker_id: usize,
    shared: &'rt Shared,
    local: &'rt LocalQueue<Task>,
    current: Option<TaskId>,
    state: WorkerState,
    tick: u32,
}

impl<'rt> WorkerContext<'rt> {
    pub(super) fn new(
        worker_id: usize,
        shared: &'rt Shared,
        local: &'rt LocalQueue<Task>,
    ) -> Self {
        Self {
            worker_id,
            shared,
            local,
            current: None,
            state: WorkerState::Init,
            tick: 0,
        }
    }

    /// Index of the worker running this step.
    #[inline]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// ID of the task being executed.
    #[inline]
    pub fn current_task(&self) -> Option<TaskId> {
        self.current
    }

    /// Current loop state (always `Executing` from inside a step).
    #[inline]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Whether step tracing is on.
    #[inline]
    pub fn is_tracing(&self) -> bool {
        self.shared.is_tracing()
    }

    /// Whether the runtime is shutting down. Long-lived tasks can use this
    /// to wind down instead of yielding forever.
    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }

    /// Spawn a closure onto the global queue.
    pub fn spawn<F>(
        &self,
        step: F,
    ) -> TaskId
    where
        F: FnMut(&mut WorkerContext<'_>) -> CoroStatus + Send + 'static,
    {
        self.spawn_global(step)
    }

    /// Spawn a coroutine onto the global queue.
    pub fn spawn_global<C: Coroutine>(
        &self,
        body: C,
    ) -> TaskId {
        let task = Task::new(self.shared.ids.next(), body);
        self.shared.spawn_task(task)
    }

    /// Spawn a named coroutine onto the global queue.
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

    /// Spawn a coroutine onto this worker's local queue.
    ///
    /// The task runs on this worker unless an idle worker steals it first.
    /// The local queue is unbounded, so this never spills.
    pub fn spawn_local<C: Coroutine>(
        &self,
        body: C,
    ) -> TaskId {
        let task = Task::new(self.shared.ids.next(), body);
        self.shared.spawn_local_task(self.local, task)
    }

    /// Number of tasks waiting on this worker's local queue.
    #[inline]
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    fn find_task(&mut self) -> Option<Task> {
        self.tick = self.tick.wrapping_add(1);
        let shared = self.shared;

        // Local spawns must not starve the global queue.
        if self.tick % GLOBAL_POLL_INTERVAL == 0 {
            if let Some(task) = shared.pop_global(self.tick) {
                return Some(task);
            }
        }

        self.local
            .pop()
            .or_else(|| shared.pop_global(self.tick))
            .or_else(|| self.steal())
    }

    /// Take a batch from another worker's local queue, starting after our
    /// own index.
    fn steal(&self) -> Option<Task> {
        let stealers = &self.shared.stealers;
        let count = stealers.len();
        for offset in 1..count {
            let victim = &stealers[(self.worker_id + offset) % count];
            loop {
                match victim.steal_batch_and_pop(self.local) {
                    Steal::Success(task) => {
                        self.shared.stats.record_steal();
                        return Some(task);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    fn set_state(
        &mut self,
        state: WorkerState,
    ) {
        if self.state != state {
            trace!(worker = self.worker_id, from = ?self.state, to = ?state, "worker state");
            self.state = state;
        }
    }
}

/// Worker thread main loop.
pub(super) fn worker_loop(
    worker_id: usize,
    local: LocalQueue<Task>,
    shared: &Shared,
) {
    WORKER_OF.with(|w| w.set(shared as *const Shared as usize));

    let mut cx = WorkerContext::new(worker_id, shared, &local);
    shared.wait_for_start();

    let backoff = Backoff::new();
    loop {
        cx.set_state(WorkerState::Polling);

        if shared.is_stopping() && shared.config.shutdown_policy == ShutdownPolicy::Abandon {
            break;
        }

        let Some(task) = cx.find_task() else {
            if shared.is_stopping() {
                break;
            }
            if backoff.is_completed() {
                shared.stats.record_idle();
                thread::sleep(shared.config.idle_timeout());
            } else {
                backoff.snooze();
            }
            continue;
        };
        backoff.reset();

        let mut next = Some(task);
        let mut inline_budget = INLINE_RESUME_LIMIT;
        while let Some(task) = next.take() {
            let Some(yielded) = execute(&mut cx, task) else {
                break;
            };
            // A full ring gets a few in-place resumes, then the task spills
            // so it cannot monopolize this worker.
            match shared.queue.enqueue(yielded) {
                Ok(()) => {}
                Err(full) if inline_budget > 0 => {
                    inline_budget -= 1;
                    shared.stats.record_inline_resume();
                    next = Some(full.into_inner());
                }
                Err(full) => shared.requeue(full.into_inner()),
            }
        }
    }

    cx.set_state(WorkerState::Shutdown);

    // Only reachable with local work left under the abandon policy.
    let mut abandoned = 0;
    while let Some(task) = local.pop() {
        drop(task);
        shared.task_discarded();
        abandoned += 1;
    }
    if abandoned > 0 {
        warn!(worker = worker_id, count = abandoned, "dropping local tasks at shutdown");
    }
    WORKER_OF.with(|w| w.set(0));
}

/// Run one step of `task`. Returns the task if it yielded.
fn execute(
    cx: &mut WorkerContext<'_>,
    mut task: Task,
) -> Option<Task> {
    let shared = cx.shared;
    cx.set_state(WorkerState::Executing);
    cx.current = Some(task.id());

    // Read once per step; a stale value only delays the toggle by a step.
    let tracing_on = shared.is_tracing();
    if tracing_on {
        info!(
            target: TRACE_TARGET,
            event = "step.start",
            worker = cx.worker_id,
            task = task.id().inner(),
            name = task.name().unwrap_or(""),
            step = task.steps() + 1,
        );
    }

    let parallelism = shared.enter_step();
    shared.stats.update_parallelism(parallelism);

    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.step(cx)));
    let elapsed = start.elapsed();

    shared.exit_step();
    cx.current = None;
    shared.stats.record_step(elapsed.as_micros() as usize);
    if tracing_on {
        shared.stats.record_traced();
    }

    match outcome {
        Ok(status) => {
            if tracing_on {
                info!(
                    target: TRACE_TARGET,
                    event = "step.stop",
                    worker = cx.worker_id,
                    task = task.id().inner(),
                    name = task.name().unwrap_or(""),
                    status = %status,
                    elapsed_us = elapsed.as_micros() as u64,
                );
            }
            match status {
                CoroStatus::Running => {
                    shared.stats.record_yield();
                    Some(task)
                }
                CoroStatus::Done => {
                    drop(task);
                    shared.stats.record_completed();
                    shared.task_discarded();
                    None
                }
            }
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                worker = cx.worker_id,
                task = task.id().inner(),
                name = task.name().unwrap_or(""),
                "task step panicked, discarding task: {}",
                message
            );
            // The coroutine's own Drop may panic as well; it is discarded
            // either way.
            let _ = panic::catch_unwind(AssertUnwindSafe(move || drop(task)));
            shared.stats.record_panicked();
            shared.task_discarded();
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
