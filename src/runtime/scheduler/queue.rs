//! Task queue for the scheduler
//!
//! Multi-producer, multi-consumer queue of opaque payloads. One interface,
//! [`MpmcQueue`], with two backing strategies:
//!
//! - [`LockedQueue`]: a singly linked list behind a mutex. Unbounded, never
//!   reports full, and is the reference behavior the runtime is built on.
//! - [`LockFreeQueue`]: a bounded ring on `crossbeam::queue::ArrayQueue`.
//!   Every slot carries a stamp (index plus lap) that a compare-and-swap must
//!   match, so a slot that was emptied and refilled cannot be mistaken for an
//!   untouched one (the ABA hazard of unstamped pointer swapping).
//!
//! [`TaskQueue`] picks a strategy from [`QueueKind`]; `Locked` is the default.
//! The lock-free ring only stays opt-in until it has been through the same
//! concurrent stress suite as the locked queue.
//!
//! # Ordering
//!
//! With a single producer and a single consumer both strategies are strict
//! FIFO. Under contention the order in which racing producers land is decided
//! by whoever wins the lock (or the tail CAS), so FIFO only holds per
//! producer. What always holds: every enqueued item is dequeued exactly once.

use std::fmt;
use std::ptr::NonNull;

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::runtime::memory::{alloc_value, take_value, AllocSnapshot, CountingAllocator};

/// Default capacity hint, matching the global ready queue size.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Largest ring the lock-free strategy will preallocate (a power of two).
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Error returned by a bounded queue that has no free slot.
///
/// The rejected item is handed back so the caller can retry, back off or drop
/// it.
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    /// Take the rejected item back.
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<T> fmt::Display for QueueFull<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("queue is full")
    }
}

impl<T> std::error::Error for QueueFull<T> {}

/// A queue safe for any number of concurrent producers and consumers.
pub trait MpmcQueue<T>: Send + Sync {
    /// Insert an item at the tail.
    ///
    /// Only bounded strategies fail. Allocation failure is not an error: it
    /// aborts.
    fn push(
        &self,
        item: T,
    ) -> Result<(), QueueFull<T>>;

    /// Remove the head item, or `None` right away if the queue is empty.
    fn pop(&self) -> Option<T>;

    /// Number of queued items. Only a hint while other threads are active.
    fn len(&self) -> usize;

    /// Whether no item is queued. Only a hint while other threads are active.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity, or `None` when unbounded.
    fn capacity(&self) -> Option<usize>;
}

/// Backing strategy for a [`TaskQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    /// Mutex-protected linked list (unbounded).
    #[default]
    Locked,
    /// Lock-free bounded ring.
    LockFree,
}

impl std::str::FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "locked" | "mutex" => Ok(QueueKind::Locked),
            "lock-free" | "lockfree" | "ring" => Ok(QueueKind::LockFree),
            other => Err(format!("unknown queue kind `{}`", other)),
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            QueueKind::Locked => f.write_str("locked"),
            QueueKind::LockFree => f.write_str("lock-free"),
        }
    }
}

struct Node<T> {
    item: T,
    next: Option<NonNull<Node<T>>>,
}

struct List<T> {
    head: Option<NonNull<Node<T>>>,
    tail: Option<NonNull<Node<T>>>,
    len: usize,
}

// Safety: the list exclusively owns its nodes; they are only reached through
// the mutex that guards the list.
unsafe impl<T: Send> Send for List<T> {}

/// Unbounded MPMC queue: a singly linked list behind a mutex.
///
/// Node wrappers are allocated on push and released on pop. The critical
/// section only relinks pointers; allocation and release happen outside it.
pub struct LockedQueue<T> {
    list: Mutex<List<T>>,
    nodes: CountingAllocator,
}

impl<T> LockedQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            list: Mutex::new(List {
                head: None,
                tail: None,
                len: 0,
            }),
            nodes: CountingAllocator::new(),
        }
    }

    /// Push onto the tail. Never fails.
    pub fn push(
        &self,
        item: T,
    ) {
        let node = alloc_value(&self.nodes, Node { item, next: None });

        let mut list = self.list.lock();
        match list.tail {
            // Safety: tail is a live node owned by the list, guarded by the lock
            Some(tail) => unsafe { (*tail.as_ptr()).next = Some(node) },
            None => list.head = Some(node),
        }
        list.tail = Some(node);
        list.len += 1;
    }

    /// Pop from the head.
    pub fn pop(&self) -> Option<T> {
        let node = {
            let mut list = self.list.lock();
            let head = list.head?;
            // Safety: head is a live node owned by the list, guarded by the lock
            list.head = unsafe { (*head.as_ptr()).next };
            if list.head.is_none() {
                list.tail = None;
            }
            list.len -= 1;
            head
        };

        // Safety: the node was unlinked above, nothing else can reach it
        let Node { item, .. } = unsafe { take_value(&self.nodes, node) };
        Some(item)
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.list.lock().len
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Node wrapper allocations and frees so far.
    pub fn node_stats(&self) -> AllocSnapshot {
        self.nodes.stats()
    }
}

impl<T> Default for LockedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LockedQueue<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LockedQueue")
            .field("len", &self.len())
            .field("nodes", &self.node_stats())
            .finish()
    }
}

impl<T> Drop for LockedQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T: Send> MpmcQueue<T> for LockedQueue<T> {
    #[inline]
    fn push(
        &self,
        item: T,
    ) -> Result<(), QueueFull<T>> {
        LockedQueue::push(self, item);
        Ok(())
    }

    #[inline]
    fn pop(&self) -> Option<T> {
        LockedQueue::pop(self)
    }

    #[inline]
    fn len(&self) -> usize {
        LockedQueue::len(self)
    }

    #[inline]
    fn capacity(&self) -> Option<usize> {
        None
    }
}

/// Bounded lock-free MPMC ring.
pub struct LockFreeQueue<T> {
    ring: ArrayQueue<T>,
}

impl<T> LockFreeQueue<T> {
    /// Create a ring with room for `capacity` items, rounded up to a power of
    /// two and kept within `2..=MAX_QUEUE_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let slots = capacity
            .clamp(2, MAX_QUEUE_CAPACITY)
            .checked_next_power_of_two()
            .unwrap_or(MAX_QUEUE_CAPACITY);
        Self {
            ring: ArrayQueue::new(slots),
        }
    }

    /// Push onto the tail, handing the item back when the ring is full.
    #[inline]
    pub fn push(
        &self,
        item: T,
    ) -> Result<(), QueueFull<T>> {
        self.ring.push(item).map_err(QueueFull)
    }

    /// Pop from the head.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.ring.pop()
    }

    /// Number of queued items.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the ring is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T> fmt::Debug for LockFreeQueue<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LockFreeQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T: Send> MpmcQueue<T> for LockFreeQueue<T> {
    #[inline]
    fn push(
        &self,
        item: T,
    ) -> Result<(), QueueFull<T>> {
        LockFreeQueue::push(self, item)
    }

    #[inline]
    fn pop(&self) -> Option<T> {
        LockFreeQueue::pop(self)
    }

    #[inline]
    fn len(&self) -> usize {
        LockFreeQueue::len(self)
    }

    #[inline]
    fn capacity(&self) -> Option<usize> {
        Some(LockFreeQueue::capacity(self))
    }
}

enum Backend<T> {
    Locked(LockedQueue<T>),
    LockFree(LockFreeQueue<T>),
}

/// The scheduler's queue: one interface over a chosen [`QueueKind`].
///
/// The queue owns node wrappers, never payloads: [`TaskQueue::destroy`] and
/// [`TaskQueue::drain`] hand remaining items back to the caller.
pub struct TaskQueue<T> {
    backend: Backend<T>,
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.backend {
            Backend::Locked(q) => q.fmt(f),
            Backend::LockFree(q) => q.fmt(f),
        }
    }
}

impl<T> TaskQueue<T> {
    /// Create the default (locked) queue. The capacity hint is ignored by
    /// the unbounded strategy.
    #[inline]
    pub fn new(capacity_hint: usize) -> Self {
        Self::with_kind(QueueKind::Locked, capacity_hint)
    }

    /// Create a queue backed by `kind`.
    pub fn with_kind(
        kind: QueueKind,
        capacity_hint: usize,
    ) -> Self {
        let backend = match kind {
            QueueKind::Locked => Backend::Locked(LockedQueue::new()),
            QueueKind::LockFree => Backend::LockFree(LockFreeQueue::new(capacity_hint)),
        };
        Self { backend }
    }

    /// Strategy in use.
    pub fn kind(&self) -> QueueKind {
        match self.backend {
            Backend::Locked(_) => QueueKind::Locked,
            Backend::LockFree(_) => QueueKind::LockFree,
        }
    }

    /// Insert an item. Fails only on a full bounded queue.
    #[inline]
    pub fn enqueue(
        &self,
        item: T,
    ) -> Result<(), QueueFull<T>> {
        match &self.backend {
            Backend::Locked(q) => {
                q.push(item);
                Ok(())
            }
            Backend::LockFree(q) => q.push(item),
        }
    }

    /// Remove the head item without waiting. `None` means empty, not failure.
    #[inline]
    pub fn dequeue(&self) -> Option<T> {
        match &self.backend {
            Backend::Locked(q) => q.pop(),
            Backend::LockFree(q) => q.pop(),
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        match &self.backend {
            Backend::Locked(q) => q.len(),
            Backend::LockFree(q) => q.len(),
        }
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        match &self.backend {
            Backend::Locked(_) => None,
            Backend::LockFree(q) => Some(q.capacity()),
        }
    }

    /// Node wrapper accounting. The ring preallocates its slots, so it
    /// always reports zero.
    pub fn node_stats(&self) -> AllocSnapshot {
        match &self.backend {
            Backend::Locked(q) => q.node_stats(),
            Backend::LockFree(_) => AllocSnapshot::default(),
        }
    }

    /// Remove every queued item, in queue order.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len());
        while let Some(item) = self.dequeue() {
            items.push(item);
        }
        items
    }

    /// Release all node wrappers and return the payloads still queued.
    pub fn destroy(self) -> Vec<T> {
        self.drain()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl<T: Send> MpmcQueue<T> for TaskQueue<T> {
    #[inline]
    fn push(
        &self,
        item: T,
    ) -> Result<(), QueueFull<T>> {
        self.enqueue(item)
    }

    #[inline]
    fn pop(&self) -> Option<T> {
        self.dequeue()
    }

    #[inline]
    fn len(&self) -> usize {
        TaskQueue::len(self)
    }

    #[inline]
    fn capacity(&self) -> Option<usize> {
        TaskQueue::capacity(self)
    }
}
