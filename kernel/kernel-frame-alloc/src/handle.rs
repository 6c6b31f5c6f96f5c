use crate::allocator::FrameAllocator;
use crate::{CoreId, PhysMapper};
use core::fmt;
use core::mem;
use kernel_addresses::PhysicalAddress;

/// Owned reference to one physical frame.
///
/// Construction (via [`FrameAllocator::allocate`]) sets the count to 1;
/// `Clone` adds a reference; `Drop` removes one, returning the frame to the
/// free list of whichever core happens to drop last. Holding the handle is
/// holding the reference; the "forgot to free" and "freed twice" bug
/// classes do not type-check.
///
/// Consumers that store frame addresses in hardware-walked structures
/// (page-table entries) leave the typed world with [`into_raw`] and re-enter
/// it with [`FrameAllocator::adopt`]; between the two they manage the
/// reference by hand with [`FrameAllocator::add_reference`] and
/// [`FrameAllocator::free`], per the copy-on-write choreography.
///
/// [`into_raw`]: Self::into_raw
pub struct FrameHandle<'a, M: PhysMapper, C: CoreId> {
    alloc: &'a FrameAllocator<M, C>,
    pa: PhysicalAddress,
}

impl<'a, M: PhysMapper, C: CoreId> FrameHandle<'a, M, C> {
    pub(crate) const fn new(alloc: &'a FrameAllocator<M, C>, pa: PhysicalAddress) -> Self {
        Self { alloc, pa }
    }

    /// Base address of the referenced frame.
    #[must_use]
    pub const fn addr(&self) -> PhysicalAddress {
        self.pa
    }

    /// Surrender the handle without dropping its reference.
    ///
    /// The caller now owns one reference to the returned address and must
    /// eventually balance it with [`FrameAllocator::free`] (or re-adopt it
    /// with [`FrameAllocator::adopt`]).
    #[must_use]
    pub fn into_raw(self) -> PhysicalAddress {
        let pa = self.pa;
        mem::forget(self);
        pa
    }
}

impl<M: PhysMapper, C: CoreId> Clone for FrameHandle<'_, M, C> {
    fn clone(&self) -> Self {
        // Cannot fault: this handle keeps the count above zero.
        self.alloc
            .add_reference(self.pa)
            .expect("live handle holds a reference");
        Self::new(self.alloc, self.pa)
    }
}

impl<M: PhysMapper, C: CoreId> Drop for FrameHandle<'_, M, C> {
    fn drop(&mut self) {
        // A fault here means the reference table is corrupted (the handle
        // was forged or its frame freed behind its back); halt.
        self.alloc
            .free(self.pa)
            .expect("frame reference bookkeeping corrupted");
    }
}

impl<M: PhysMapper, C: CoreId> fmt::Debug for FrameHandle<'_, M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FrameHandle").field(&self.pa).finish()
    }
}
