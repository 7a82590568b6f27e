//! Runtime system
//!
//! This module contains the allocator wrapper and the cooperative scheduler.

pub mod memory;
pub mod scheduler;
