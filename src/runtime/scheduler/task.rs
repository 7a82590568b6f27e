//! Task definitions for the scheduler.
//!
//! A task is a step function plus the state it owns. The runtime calls the
//! step repeatedly; the step reports whether it wants another turn
//! ([`CoroStatus::Running`]) or is finished ([`CoroStatus::Done`]). There is
//! no suspension inside a step, so a step that blocks holds its worker thread
//! for as long as it blocks.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use super::worker::WorkerContext;

/// Result of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoroStatus {
    /// Yield: queue the task again and call it later.
    Running,
    /// Finished: the runtime drops the task and never calls it again.
    Done,
}

impl CoroStatus {
    /// Whether the task finished.
    #[inline]
    pub fn is_done(self) -> bool {
        self == CoroStatus::Done
    }
}

impl fmt::Display for CoroStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            CoroStatus::Running => f.write_str("running"),
            CoroStatus::Done => f.write_str("done"),
        }
    }
}

/// A cooperatively scheduled unit of work.
///
/// The implementor owns its state. `resume` is called once per scheduling
/// turn and picks up wherever that state says it left off. The call that
/// returns [`CoroStatus::Done`] is the last one; the value is dropped right
/// after it.
///
/// Any `FnMut(&mut WorkerContext<'_>) -> CoroStatus` closure is a coroutine.
pub trait Coroutine: Send + 'static {
    /// Run one step.
    fn resume(
        &mut self,
        cx: &mut WorkerContext<'_>,
    ) -> CoroStatus;
}

impl<F> Coroutine for F
where
    F: FnMut(&mut WorkerContext<'_>) -> CoroStatus + Send + 'static,
{
    #[inline]
    fn resume(
        &mut self,
        cx: &mut WorkerContext<'_>,
    ) -> CoroStatus {
        self(cx)
    }
}

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Hands out task IDs. Shared by every spawner, so it is lock-free.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next_id: AtomicU64,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next task ID.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// IDs handed out so far.
    #[inline]
    pub fn issued(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}

/// A scheduled task: a boxed coroutine and its bookkeeping.
pub struct Task {
    /// Unique task ID.
    id: TaskId,
    /// Optional name, shown in trace records.
    name: Option<String>,
    /// Steps executed so far.
    steps: u64,
    /// The work itself.
    body: Box<dyn Coroutine>,
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Create a task with the given ID and coroutine.
    pub fn new<C: Coroutine>(
        id: TaskId,
        body: C,
    ) -> Self {
        Self {
            id,
            name: None,
            steps: 0,
            body: Box::new(body),
        }
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the task name.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Steps executed so far.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run one step.
    #[inline]
    pub fn step(
        &mut self,
        cx: &mut WorkerContext<'_>,
    ) -> CoroStatus {
        self.steps += 1;
        self.body.resume(cx)
    }
}

/// Task builder for attaching options before spawning.
#[derive(Debug, Default)]
pub struct TaskBuilder {
    name: Option<String>,
}

impl TaskBuilder {
    /// Create a new task builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task name.
    #[inline]
    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the task with the given ID and coroutine.
    pub fn build<C: Coroutine>(
        self,
        id: TaskId,
        body: C,
    ) -> Task {
        let mut task = Task::new(id, body);
        task.name = self.name;
        task
    }
}

/// Cooperative cancellation flag.
///
/// The runtime has no way to stop a task from outside. Applications put a
/// token in the task's state, call [`CancelToken::cancel`] from anywhere, and
/// the step checks [`CancelToken::is_cancelled`] and returns
/// [`CoroStatus::Done`] early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    #[inline]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
