//! Memory primitives for the runtime
//!
//! The scheduler never allocates through anything but this module. The
//! contract is abort-on-failure: [`alloc`] returns a non-null block or the
//! process terminates, so no caller carries an out-of-memory branch.

mod allocator;

pub use allocator::{
    alloc, alloc_value, free, take_value, AllocSnapshot, AllocStats, Allocator,
    CountingAllocator, MemoryLayout, SystemAllocator,
};
