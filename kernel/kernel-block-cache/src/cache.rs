use crate::error::{CacheFault, GeometryError};
use crate::guard::BlockGuard;
use crate::slot::{NIL, NO_IDENT, Slot};
use crate::stats::{CacheStats, Counters};
use crate::{BlockId, BlockStore, TickSource};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::Ordering;
use kernel_sync::{SpinLock, SpinWait, WaitChannel};
use log::{debug, info};

/// Bucket count used by [`BlockCache::new`]; prime, so block numbers with
/// a common stride still spread.
pub const DEFAULT_BUCKET_COUNT: usize = 13;

/// One hash partition: the head of an intrusive doubly-linked list of slot
/// indices. Membership links live in the slot arena.
struct Bucket {
    head: u32,
}

/// The block cache. See the crate docs for the consumer protocol.
///
/// `S` is the backing-store driver, `T` the tick source, `W` the wait
/// channel behind every slot's content lock. All three are chosen once at
/// boot; the cache itself is shared by reference for the kernel's lifetime.
///
/// Lock order is fixed and is the sole deadlock-avoidance mechanism: the
/// pool lock, when taken, always precedes bucket locks; at most two bucket
/// locks are held at once (home plus one donor, only under the pool lock);
/// content locks are only acquired with no spin lock held.
pub struct BlockCache<S, T, W = SpinWait> {
    store: S,
    ticks: T,
    /// Serializes the miss path, so no two threads evict at once.
    pool: SpinLock<()>,
    buckets: Box<[SpinLock<Bucket>]>,
    slots: Box<[Slot<W>]>,
    counters: Counters,
}

impl<S, T, W> fmt::Debug for BlockCache<S, T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCache")
            .field("slots", &self.slots.len())
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl<S: BlockStore, T: TickSource, W: WaitChannel> BlockCache<S, T, W> {
    /// Pool of `slot_count` slots over [`DEFAULT_BUCKET_COUNT`] buckets.
    ///
    /// # Errors
    /// See [`Self::with_geometry`].
    pub fn new(store: S, ticks: T, slot_count: usize) -> Result<Self, GeometryError> {
        Self::with_geometry(store, ticks, slot_count, DEFAULT_BUCKET_COUNT)
    }

    /// Pool with explicit geometry. Both counts are fixed for the cache's
    /// lifetime; slots are seeded round-robin across buckets, unbound.
    ///
    /// # Errors
    /// Rejects a slotless or bucketless pool, or more slots than the index
    /// space can name.
    pub fn with_geometry(
        store: S,
        ticks: T,
        slot_count: usize,
        bucket_count: usize,
    ) -> Result<Self, GeometryError> {
        if slot_count == 0 {
            return Err(GeometryError::NoSlots);
        }
        if bucket_count == 0 {
            return Err(GeometryError::NoBuckets);
        }
        if slot_count >= NIL as usize {
            return Err(GeometryError::TooManySlots);
        }

        let buckets: Vec<SpinLock<Bucket>> = (0..bucket_count)
            .map(|_| SpinLock::new(Bucket { head: NIL }))
            .collect();
        let slots: Vec<Slot<W>> = (0..slot_count).map(|_| Slot::unbound()).collect();

        let this = Self {
            store,
            ticks,
            pool: SpinLock::new(()),
            buckets: buckets.into_boxed_slice(),
            slots: slots.into_boxed_slice(),
            counters: Counters::default(),
        };
        for idx in 0..slot_count {
            let mut bucket = this.buckets[idx % bucket_count].lock();
            this.link_front(&mut bucket, idx);
        }
        info!("block cache: {slot_count} slots across {bucket_count} buckets");
        Ok(this)
    }

    /// Fetch the block `id` with its content lock held and one reference
    /// taken.
    ///
    /// Blocks (sleeps, under a scheduler-backed wait channel) while another
    /// thread holds the slot's content lock. On a miss the content is read
    /// from the backing store before the guard is returned, so the guard
    /// always exposes valid content.
    ///
    /// # Errors
    /// [`CacheFault::PoolExhausted`] when no slot in the entire pool has a
    /// zero reference count; fatal by contract.
    pub fn fetch(&self, id: BlockId) -> Result<BlockGuard<'_, S, T, W>, CacheFault> {
        debug_assert!(id.pack() != NO_IDENT, "reserved identity fetched");
        let idx = self.grab(id)?;
        let slot = &self.slots[idx];

        // No spin lock is held here; blocking is allowed.
        let mut content = slot.content.lock();
        if !slot.valid.load(Ordering::Acquire) {
            self.store.read(id, &mut content);
            slot.valid.store(true, Ordering::Release);
        }
        Ok(BlockGuard::new(self, idx, id, content))
    }

    /// Slots currently bound to `id`. The at-most-one-copy invariant keeps
    /// this at 0 or 1 at every instant; exposed for diagnostics and the
    /// invariant probes in the test suite.
    #[must_use]
    pub fn resident(&self, id: BlockId) -> usize {
        let word = id.pack();
        self.slots
            .iter()
            .filter(|slot| slot.ident.load(Ordering::Acquire) == word)
            .count()
    }

    /// Point-in-time operation counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Number of slots in the pool.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Three-phase lookup: fast hit under the home bucket lock alone, then
    /// a re-scan under the pool lock, then eviction. Returns the slot index
    /// with one reference taken; the content lock is the caller's business.
    fn grab(&self, id: BlockId) -> Result<usize, CacheFault> {
        let home = self.bucket_of(id.number);

        // Phase 1: fast hit path; one bucket lock, nothing else.
        {
            let bucket = self.buckets[home].lock();
            if let Some(idx) = self.scan(&bucket, id) {
                self.slots[idx].refs.fetch_add(1, Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(idx);
            }
        }

        // Phase 2: miss. Pool lock first (lock order), then the home
        // bucket again: another thread may have bound this identity
        // between the two lockings, and finding it here is what keeps the
        // at-most-one-copy invariant.
        self.counters.slow_paths.fetch_add(1, Ordering::Relaxed);
        let _pool = self.pool.lock();
        let mut bucket = self.buckets[home].lock();
        if let Some(idx) = self.scan(&bucket, id) {
            self.slots[idx].refs.fetch_add(1, Ordering::Relaxed);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(idx);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        // Phase 3: evict the coldest unreferenced slot, home bucket first.
        if let Some(idx) = self.coldest_free(&bucket) {
            self.bind(idx, id);
            self.counters.local_evictions.fetch_add(1, Ordering::Relaxed);
            return Ok(idx);
        }

        // Ring walk over donor buckets, one donor lock at a time, home
        // lock still held. The claim happens while the donor lock is held,
        // so no other path can touch the slot in between.
        let n = self.buckets.len();
        for step in 1..n {
            let donor_index = (home + step) % n;
            let mut donor = self.buckets[donor_index].lock();
            if let Some(idx) = self.coldest_free(&donor) {
                self.bind(idx, id);
                self.unlink(&mut donor, idx);
                drop(donor);
                self.link_front(&mut bucket, idx);
                self.counters.cross_bucket_steals.fetch_add(1, Ordering::Relaxed);
                debug!("block cache: bucket {home} stole slot {idx} from bucket {donor_index}");
                return Ok(idx);
            }
        }

        Err(CacheFault::PoolExhausted)
    }

    /// Drop the reference taken by `fetch`; called by the guard after the
    /// content lock is released. Reaching zero stamps release recency.
    pub(crate) fn release(&self, idx: usize) {
        let slot = &self.slots[idx];
        let number = BlockId::unpack(slot.ident.load(Ordering::Acquire)).number;
        let _bucket = self.buckets[self.bucket_of(number)].lock();
        let prev = slot.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "release of an unreferenced slot");
        if prev == 1 {
            slot.last_release
                .store(self.ticks.current_tick(), Ordering::Relaxed);
        }
    }

    /// Extra reference without the content lock (pin).
    pub(crate) fn retain(&self, idx: usize) {
        let slot = &self.slots[idx];
        let number = BlockId::unpack(slot.ident.load(Ordering::Acquire)).number;
        let _bucket = self.buckets[self.bucket_of(number)].lock();
        slot.refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a pin reference. No recency stamp: pins do not touch content,
    /// so they carry no recency signal.
    pub(crate) fn unpin(&self, idx: usize) {
        let slot = &self.slots[idx];
        let number = BlockId::unpack(slot.ident.load(Ordering::Acquire)).number;
        let _bucket = self.buckets[self.bucket_of(number)].lock();
        let prev = slot.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of an unreferenced slot");
    }

    fn bucket_of(&self, number: u32) -> usize {
        number as usize % self.buckets.len()
    }

    /// Walk one bucket's membership for an identity match. Caller holds
    /// the bucket lock.
    fn scan(&self, bucket: &Bucket, id: BlockId) -> Option<usize> {
        let word = id.pack();
        let mut idx = bucket.head;
        while idx != NIL {
            let slot = &self.slots[idx as usize];
            if slot.ident.load(Ordering::Acquire) == word {
                return Some(idx as usize);
            }
            idx = slot.next.load(Ordering::Relaxed);
        }
        None
    }

    /// Unreferenced slot with the smallest release stamp in one bucket;
    /// ties go to scan order. Caller holds the bucket lock.
    fn coldest_free(&self, bucket: &Bucket) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        let mut idx = bucket.head;
        while idx != NIL {
            let slot = &self.slots[idx as usize];
            if slot.refs.load(Ordering::Acquire) == 0 {
                let stamp = slot.last_release.load(Ordering::Relaxed);
                if best.is_none_or(|(_, b)| stamp < b) {
                    best = Some((idx as usize, stamp));
                }
            }
            idx = slot.next.load(Ordering::Relaxed);
        }
        best.map(|(idx, _)| idx)
    }

    /// Re-identify a claimed slot. Caller holds the pool lock and the lock
    /// of the bucket currently listing the slot; the zero count guarantees
    /// no guard or pin exists.
    fn bind(&self, idx: usize, id: BlockId) {
        let slot = &self.slots[idx];
        slot.ident.store(id.pack(), Ordering::Release);
        slot.refs.store(1, Ordering::Relaxed);
        slot.valid.store(false, Ordering::Release);
    }

    /// Remove a slot from a bucket list. Caller holds that bucket's lock.
    #[allow(clippy::cast_possible_truncation)]
    fn unlink(&self, bucket: &mut Bucket, idx: usize) {
        let slot = &self.slots[idx];
        let prev = slot.prev.load(Ordering::Relaxed);
        let next = slot.next.load(Ordering::Relaxed);
        if prev == NIL {
            bucket.head = next;
        } else {
            self.slots[prev as usize].next.store(next, Ordering::Relaxed);
        }
        if next != NIL {
            self.slots[next as usize].prev.store(prev, Ordering::Relaxed);
        }
        slot.prev.store(NIL, Ordering::Relaxed);
        slot.next.store(NIL, Ordering::Relaxed);
    }

    /// Push a slot onto a bucket list head. Caller holds that bucket's
    /// lock.
    #[allow(clippy::cast_possible_truncation)]
    fn link_front(&self, bucket: &mut Bucket, idx: usize) {
        let slot = &self.slots[idx];
        let old_head = bucket.head;
        slot.prev.store(NIL, Ordering::Relaxed);
        slot.next.store(old_head, Ordering::Relaxed);
        if old_head != NIL {
            self.slots[old_head as usize]
                .prev
                .store(idx as u32, Ordering::Relaxed);
        }
        bucket.head = idx as u32; // slot_count < NIL, checked at construction
    }
}
