//! Allocator wrapper for the runtime
//!
//! Every heap block the scheduler owns (queue nodes, mostly) goes through this
//! module. Allocation never fails from the caller's point of view: when the
//! system allocator returns null the process is terminated through
//! [`std::alloc::handle_alloc_error`], so out-of-memory is not part of any
//! recoverable error surface.
//!
//! # Design Principles
//! - Simple trait: alloc / dealloc
//! - No ownership logic, just raw memory
//! - Send + Sync so one allocator can back a queue shared by many threads

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory layout helper
///
/// Wraps `std::alloc::Layout` with convenient constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    size: usize,
    align: usize,
}

impl MemoryLayout {
    /// Create a layout from size and alignment
    ///
    /// # Returns
    /// `Some(MemoryLayout)` if alignment is valid (power of 2), `None` otherwise.
    pub fn from_size_align(
        size: usize,
        align: usize,
    ) -> Option<Self> {
        if align == 0 || !align.is_power_of_two() {
            return None;
        }

        // Adjust size to meet alignment requirements
        let aligned_size = size.checked_add(align - 1)? & !(align - 1);

        // Layout rejects sizes that overflow isize once rounded
        Layout::from_size_align(aligned_size.max(1), align).ok()?;

        Some(Self {
            size: aligned_size,
            align,
        })
    }

    /// Create a layout for type T
    pub fn new<T>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        }
    }

    /// Get the size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the alignment
    pub fn align(&self) -> usize {
        self.align
    }

    /// Convert to std::alloc::Layout
    ///
    /// Zero-sized requests are widened to one byte so the system allocator is
    /// never asked for an empty block.
    pub fn to_std_layout(&self) -> Layout {
        // Safety: align is a power of two and the rounded size was checked
        // against Layout's limits in from_size_align / new
        unsafe { Layout::from_size_align_unchecked(self.size.max(1), self.align) }
    }
}

/// Allocate a block for `layout`.
///
/// The returned pointer is never null. On allocation failure the process
/// aborts.
pub fn alloc(layout: MemoryLayout) -> NonNull<u8> {
    let std_layout = layout.to_std_layout();
    // Safety: to_std_layout never produces a zero-sized layout
    let ptr = unsafe { alloc::alloc(std_layout) };
    match NonNull::new(ptr) {
        Some(ptr) => ptr,
        None => alloc::handle_alloc_error(std_layout),
    }
}

/// Release a block obtained from [`alloc`].
///
/// # Safety
/// `ptr` must come from [`alloc`] with the same `layout` and must not have
/// been freed already.
pub unsafe fn free(
    ptr: NonNull<u8>,
    layout: MemoryLayout,
) {
    alloc::dealloc(ptr.as_ptr(), layout.to_std_layout());
}

/// Core allocator trait
///
/// Implementations must abort rather than return on exhaustion; there is no
/// error value to hand back.
pub trait Allocator: Send + Sync {
    /// Allocate memory with the given layout
    fn alloc(
        &self,
        layout: MemoryLayout,
    ) -> NonNull<u8>;

    /// Deallocate memory
    ///
    /// # Safety
    /// `ptr` must have been returned by `alloc` on this allocator with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn dealloc(
        &self,
        ptr: NonNull<u8>,
        layout: MemoryLayout,
    );
}

/// The process allocator, through [`alloc`] and [`free`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    #[inline]
    fn alloc(
        &self,
        layout: MemoryLayout,
    ) -> NonNull<u8> {
        alloc(layout)
    }

    #[inline]
    unsafe fn dealloc(
        &self,
        ptr: NonNull<u8>,
        layout: MemoryLayout,
    ) {
        free(ptr, layout)
    }
}

/// Allocation counters.
#[derive(Debug, Default)]
pub struct AllocStats {
    allocations: AtomicUsize,
    frees: AtomicUsize,
}

/// Point-in-time copy of [`AllocStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct AllocSnapshot {
    /// Blocks handed out.
    pub allocations: usize,
    /// Blocks returned.
    pub frees: usize,
}

impl AllocSnapshot {
    /// Blocks currently outstanding.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.allocations.saturating_sub(self.frees)
    }

    /// Every allocation has a matching free.
    #[inline]
    pub fn is_balanced(&self) -> bool {
        self.allocations == self.frees
    }
}

impl AllocStats {
    #[inline]
    fn record_alloc(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Read both counters.
    pub fn snapshot(&self) -> AllocSnapshot {
        AllocSnapshot {
            allocations: self.allocations.load(Ordering::Acquire),
            frees: self.frees.load(Ordering::Acquire),
        }
    }
}

/// Allocator that counts blocks on top of another allocator.
#[derive(Debug, Default)]
pub struct CountingAllocator<A: Allocator = SystemAllocator> {
    inner: A,
    stats: AllocStats,
}

impl CountingAllocator<SystemAllocator> {
    /// Count on top of the process allocator.
    pub fn new() -> Self {
        Self::with_inner(SystemAllocator)
    }
}

impl<A: Allocator> CountingAllocator<A> {
    /// Count on top of `inner`.
    pub fn with_inner(inner: A) -> Self {
        Self {
            inner,
            stats: AllocStats::default(),
        }
    }

    /// Current counters.
    #[inline]
    pub fn stats(&self) -> AllocSnapshot {
        self.stats.snapshot()
    }
}

impl<A: Allocator> Allocator for CountingAllocator<A> {
    fn alloc(
        &self,
        layout: MemoryLayout,
    ) -> NonNull<u8> {
        let ptr = self.inner.alloc(layout);
        self.stats.record_alloc();
        ptr
    }

    unsafe fn dealloc(
        &self,
        ptr: NonNull<u8>,
        layout: MemoryLayout,
    ) {
        self.inner.dealloc(ptr, layout);
        self.stats.record_free();
    }
}

/// Move `value` into a fresh block from `allocator`.
pub fn alloc_value<T, A: Allocator + ?Sized>(
    allocator: &A,
    value: T,
) -> NonNull<T> {
    let ptr = allocator.alloc(MemoryLayout::new::<T>()).cast::<T>();
    // Safety: the block is sized and aligned for T and not yet initialized
    unsafe { ptr.as_ptr().write(value) };
    ptr
}

/// Move the value out of a block from [`alloc_value`] and release the block.
///
/// # Safety
/// `ptr` must come from [`alloc_value`] on the same allocator and must not be
/// read or freed again.
pub unsafe fn take_value<T, A: Allocator + ?Sized>(
    allocator: &A,
    ptr: NonNull<T>,
) -> T {
    let value = ptr.as_ptr().read();
    allocator.dealloc(ptr.cast::<u8>(), MemoryLayout::new::<T>());
    value
}
