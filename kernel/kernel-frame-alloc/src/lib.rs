//! # Physical Frame Allocator
//!
//! Manages a fixed range of 4 KiB physical frames for page tables, stacks,
//! pipe buffers and user pages. The pool is partitioned into per-core free
//! lists so the common allocation path touches only the calling core's
//! shard; a core whose shard runs dry steals from the others, one shard
//! lock at a time.
//!
//! Frames are reference counted so mappings can share a frame without
//! copying (deferred-copy / copy-on-write): [`FrameAllocator::add_reference`]
//! duplicates ownership, and a frame returns to a free list only when the
//! count falls back to zero. Counts live in a per-frame atomic table,
//! independent of the shard locks, so neither lock domain ever waits on the
//! other.
//!
//! All locking is spin-only; no operation blocks the caller. The allocator
//! is safe to use from contexts that cannot sleep.
//!
//! Two error classes, deliberately separate types:
//! - [`AllocError`]: exhaustion; report to the caller, who may retry later.
//! - [`FrameFault`]: caller corruption (misaligned or foreign address,
//!   count underflow); the embedder must treat this as fatal and halt.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod allocator;
mod error;
mod handle;
mod phys_mapper;

pub use allocator::{ALLOC_FILL, FrameAllocator, SCRUB_FILL};
pub use error::{AllocError, FrameFault, GeometryError};
pub use handle::FrameHandle;
pub use phys_mapper::{OffsetPhysMapper, PhysMapper};

/// Identifies the core an operation runs on.
///
/// Supplied by the embedder (CPU-local state, `mrs`/`rdtscp`/gs-relative
/// reads, whatever the architecture offers). The allocator only uses it to
/// pick a shard, reducing the returned value modulo the shard count.
pub trait CoreId {
    fn current_core(&self) -> usize;
}

impl<C: CoreId> CoreId for &C {
    #[inline]
    fn current_core(&self) -> usize {
        (**self).current_core()
    }
}
