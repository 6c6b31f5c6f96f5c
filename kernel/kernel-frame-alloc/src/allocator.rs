use crate::error::{AllocError, FrameFault, GeometryError};
use crate::handle::FrameHandle;
use crate::{CoreId, PhysMapper};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_addresses::{FRAME_SIZE, PhysicalAddress, align_down, align_up};
use kernel_sync::SpinLock;
use log::{debug, info};

/// Byte written across a frame when it is handed out. Reads of memory the
/// owner never initialized surface as this pattern.
pub const ALLOC_FILL: u8 = 0xA5;

/// Byte written across a frame when its reference count reaches zero.
/// Distinct from [`ALLOC_FILL`] so dangling references are recognizable.
pub const SCRUB_FILL: u8 = 0x0F;

/// Free-list terminator in the intrusive link arena.
const NIL: u32 = u32::MAX;

/// One per-core free list: head into the link arena plus a population
/// count for diagnostics.
struct Shard {
    head: u32,
    len: usize,
}

/// Sharded, reference-counted physical frame allocator.
///
/// See the crate docs for the concurrency story. Construction is the one
/// explicit initialization step of the subsystem; the value is then shared
/// by reference for the lifetime of the kernel.
pub struct FrameAllocator<M, C> {
    mapper: M,
    cores: C,
    /// First managed frame base (inclusive).
    base: PhysicalAddress,
    /// End of the managed range (exclusive), frame-aligned.
    limit: PhysicalAddress,
    shards: Box<[SpinLock<Shard>]>,
    /// Intrusive next-free index per frame. A frame's cell is only touched
    /// under the lock of the shard whose list currently holds it.
    links: Box<[AtomicU32]>,
    /// Reference count per frame, synchronized independently of the shard
    /// locks.
    refs: Box<[AtomicU32]>,
}

impl<M: PhysMapper, C: CoreId> FrameAllocator<M, C> {
    /// Take ownership of the physical range `[start, end)`.
    ///
    /// The base is rounded up and the limit down to frame alignment; every
    /// complete frame in between is scrubbed and distributed round-robin
    /// across `shard_count` free lists. Call once at boot.
    ///
    /// # Errors
    /// Rejects geometry with no shards, no complete frame, or more frames
    /// than the index space can name.
    pub fn new(
        mapper: M,
        cores: C,
        start: PhysicalAddress,
        end: PhysicalAddress,
        shard_count: usize,
    ) -> Result<Self, GeometryError> {
        if shard_count == 0 {
            return Err(GeometryError::NoShards);
        }
        let base = align_up(start.as_u64(), FRAME_SIZE);
        let limit = align_down(end.as_u64(), FRAME_SIZE);
        if limit <= base {
            return Err(GeometryError::EmptyRange);
        }
        let frame_count = usize::try_from((limit - base) / FRAME_SIZE)
            .map_err(|_| GeometryError::TooManyFrames)?;
        if frame_count >= NIL as usize {
            return Err(GeometryError::TooManyFrames);
        }

        let shards: Vec<SpinLock<Shard>> = (0..shard_count)
            .map(|_| SpinLock::new(Shard { head: NIL, len: 0 }))
            .collect();
        // Every frame starts owned (count 1) and is pushed through the
        // regular free path below, so all of boot memory carries the scrub
        // pattern before the first allocation.
        let links: Vec<AtomicU32> = (0..frame_count).map(|_| AtomicU32::new(NIL)).collect();
        let refs: Vec<AtomicU32> = (0..frame_count).map(|_| AtomicU32::new(1)).collect();

        let this = Self {
            mapper,
            cores,
            base: PhysicalAddress::new(base),
            limit: PhysicalAddress::new(limit),
            shards: shards.into_boxed_slice(),
            links: links.into_boxed_slice(),
            refs: refs.into_boxed_slice(),
        };
        for idx in 0..frame_count {
            // Cannot fault: the address is derived from the geometry just
            // validated and the count is 1 by construction.
            this.free_on_shard(this.addr_of(idx), idx % shard_count)
                .expect("boot free of a managed frame");
        }
        info!(
            "frame allocator: {frame_count} frames in [{base:#x}, {limit:#x}) across {shard_count} shards"
        );
        Ok(this)
    }

    /// Allocate one frame with reference count 1 and contents set to
    /// [`ALLOC_FILL`].
    ///
    /// Tries the calling core's shard first, then the remaining shards in
    /// ring order, taking one shard lock at a time. Spin-only; never blocks
    /// the caller.
    ///
    /// # Errors
    /// [`AllocError::OutOfFrames`] when every shard is empty.
    pub fn allocate(&self) -> Result<FrameHandle<'_, M, C>, AllocError> {
        let home = self.home_shard();
        let idx = self
            .pop(home)
            .or_else(|| self.steal(home))
            .ok_or(AllocError::OutOfFrames)?;
        self.refs[idx].store(1, Ordering::Release);
        self.fill(idx, ALLOC_FILL);
        Ok(FrameHandle::new(self, self.addr_of(idx)))
    }

    /// Drop one reference to the frame at `pa`.
    ///
    /// When the count reaches zero the frame is scrubbed with
    /// [`SCRUB_FILL`] and pushed onto the *calling* core's free list;
    /// free-list custody is transient, not tied to where the frame was
    /// allocated.
    ///
    /// # Errors
    /// [`FrameFault`] on a misaligned or foreign address, or when the count
    /// is already zero (double free). Faults are fatal to the embedder.
    pub fn free(&self, pa: PhysicalAddress) -> Result<(), FrameFault> {
        self.free_on_shard(pa, self.home_shard())
    }

    /// Add one reference to the already-allocated frame at `pa`, for
    /// mappings that share the frame without copying it.
    ///
    /// # Errors
    /// [`FrameFault`] on a misaligned or foreign address, or when the frame
    /// is currently free: a zero-count frame lives on a free list, and
    /// retaining it would alias the next allocation.
    pub fn add_reference(&self, pa: PhysicalAddress) -> Result<(), FrameFault> {
        let idx = self.frame_index(pa)?;
        self.refs[idx]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_add(1).filter(|_| count != 0)
            })
            .map_err(|_| FrameFault::RetainOfFree(pa))?;
        Ok(())
    }

    /// Current reference count of the frame at `pa`. Copy-on-write fault
    /// handlers use a count of 1 to detect sole ownership and skip the
    /// copy.
    ///
    /// # Errors
    /// [`FrameFault`] on a misaligned or foreign address.
    pub fn reference_count(&self, pa: PhysicalAddress) -> Result<u32, FrameFault> {
        let idx = self.frame_index(pa)?;
        Ok(self.refs[idx].load(Ordering::Acquire))
    }

    /// Total frames currently sitting on free lists, summed across shards.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len).sum()
    }

    /// Number of frames under management.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.refs.len()
    }

    /// Re-adopt a raw frame address as an owned handle.
    ///
    /// Inverse of [`FrameHandle::into_raw`], for crossing back out of a
    /// page-table entry.
    ///
    /// # Safety
    /// `pa` must carry exactly one outstanding reference that the caller
    /// owns and has not freed; the returned handle now owns it.
    #[must_use]
    pub const unsafe fn adopt(&self, pa: PhysicalAddress) -> FrameHandle<'_, M, C> {
        FrameHandle::new(self, pa)
    }

    fn home_shard(&self) -> usize {
        self.cores.current_core() % self.shards.len()
    }

    fn free_on_shard(&self, pa: PhysicalAddress, shard: usize) -> Result<(), FrameFault> {
        let idx = self.frame_index(pa)?;
        let prev = self.refs[idx]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .map_err(|_| FrameFault::FreeOfFree(pa))?;
        if prev == 1 {
            // Last reference gone: scrub while in exclusive custody, then
            // publish onto the free list.
            self.fill(idx, SCRUB_FILL);
            self.push(shard, idx);
        }
        Ok(())
    }

    /// Pop the head frame of one shard's free list.
    fn pop(&self, shard: usize) -> Option<usize> {
        let mut s = self.shards[shard].lock();
        let head = s.head;
        if head == NIL {
            return None;
        }
        s.head = self.links[head as usize].load(Ordering::Relaxed);
        s.len -= 1;
        Some(head as usize)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push(&self, shard: usize, idx: usize) {
        let mut s = self.shards[shard].lock();
        self.links[idx].store(s.head, Ordering::Relaxed);
        s.head = idx as u32; // frame_count < NIL, checked at construction
        s.len += 1;
    }

    /// Visit the other shards in ring order, starting just past the home
    /// shard, and take the first free frame found. One shard lock is held
    /// at a time, never two.
    fn steal(&self, home: usize) -> Option<usize> {
        let n = self.shards.len();
        for step in 1..n {
            let victim = (home + step) % n;
            if let Some(idx) = self.pop(victim) {
                debug!(
                    "frame allocator: shard {home} stole {} from shard {victim}",
                    self.addr_of(idx)
                );
                return Some(idx);
            }
        }
        None
    }

    fn fill(&self, idx: usize, byte: u8) {
        let ptr = self.mapper.frame_ptr(self.addr_of(idx));
        // Safety: the frame is in this thread's exclusive custody: it was
        // just popped off a free list, or its reference count just fell to
        // zero and it is not yet back on one.
        unsafe {
            ptr::write_bytes(ptr, byte, FRAME_SIZE as usize);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn frame_index(&self, pa: PhysicalAddress) -> Result<usize, FrameFault> {
        if !pa.is_aligned_to(FRAME_SIZE) {
            return Err(FrameFault::Misaligned(pa));
        }
        if pa < self.base || pa >= self.limit {
            return Err(FrameFault::OutOfRange(pa));
        }
        Ok(((pa - self.base) / FRAME_SIZE) as usize)
    }

    fn addr_of(&self, idx: usize) -> PhysicalAddress {
        self.base + idx as u64 * FRAME_SIZE
    }
}
