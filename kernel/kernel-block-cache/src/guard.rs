use crate::cache::BlockCache;
use crate::{BlockData, BlockId, BlockStore, TickSource};
use core::fmt;
use core::ops::{Deref, DerefMut};
use kernel_sync::{SleepLockGuard, WaitChannel};

/// Exclusive handle to one fetched block.
///
/// Holding the guard *is* holding the slot's content lock and one
/// reference; dropping it is the release operation. Content is only
/// reachable through the guard, so committing or touching a block without
/// the lock is not expressible; the ownership check is the type system
/// rather than a runtime assertion:
///
/// ```compile_fail
/// use kernel_block_cache::{BlockCache, BlockId, BlockStore, CacheFault, TickSource};
///
/// fn broken<S, T>(cache: &BlockCache<S, T>) -> Result<(), CacheFault>
/// where
///     S: BlockStore,
///     T: TickSource,
/// {
///     let guard = cache.fetch(BlockId::new(0, 7))?;
///     drop(guard); // release
///     guard.commit(); // error: the handle is gone with the lock
///     Ok(())
/// }
/// ```
pub struct BlockGuard<'a, S: BlockStore, T: TickSource, W: WaitChannel> {
    cache: &'a BlockCache<S, T, W>,
    slot: usize,
    id: BlockId,
    /// `Some` until drop; taken first so the content lock is released
    /// before the reference count drops.
    content: Option<SleepLockGuard<'a, BlockData, W>>,
}

impl<'a, S: BlockStore, T: TickSource, W: WaitChannel> BlockGuard<'a, S, T, W> {
    pub(crate) fn new(
        cache: &'a BlockCache<S, T, W>,
        slot: usize,
        id: BlockId,
        content: SleepLockGuard<'a, BlockData, W>,
    ) -> Self {
        Self {
            cache,
            slot,
            id,
            content: Some(content),
        }
    }

    /// Identity this guard is locked on.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Synchronously write the block's content to the backing store.
    ///
    /// The content lock is held for the duration of the transfer, by
    /// construction.
    pub fn commit(&self) {
        self.cache.store().write(self.id, self);
    }

    /// Take an extra reference that outlives this guard, keeping the slot
    /// resident without holding its content lock.
    #[must_use]
    pub fn pin(&self) -> BlockPin<'a, S, T, W> {
        self.cache.retain(self.slot);
        BlockPin {
            cache: self.cache,
            slot: self.slot,
            id: self.id,
        }
    }
}

impl<S: BlockStore, T: TickSource, W: WaitChannel> Deref for BlockGuard<'_, S, T, W> {
    type Target = BlockData;
    fn deref(&self) -> &BlockData {
        self.content.as_ref().expect("content guard held until drop")
    }
}

impl<S: BlockStore, T: TickSource, W: WaitChannel> DerefMut for BlockGuard<'_, S, T, W> {
    fn deref_mut(&mut self) -> &mut BlockData {
        self.content.as_mut().expect("content guard held until drop")
    }
}

impl<S: BlockStore, T: TickSource, W: WaitChannel> Drop for BlockGuard<'_, S, T, W> {
    fn drop(&mut self) {
        // Content lock first, then the reference: a waiter woken by the
        // unlock may legitimately observe the count still at one.
        drop(self.content.take());
        self.cache.release(self.slot);
    }
}

impl<S: BlockStore, T: TickSource, W: WaitChannel> fmt::Debug for BlockGuard<'_, S, T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockGuard").field(&self.id).finish()
    }
}

/// A reference to a slot without its content lock.
///
/// Keeps the slot's identity resident (it cannot be chosen for eviction)
/// while leaving the content lock free for other threads. Taken via
/// [`BlockGuard::pin`]; dropping the pin is the unpin operation. Pins
/// carry no recency signal.
pub struct BlockPin<'a, S: BlockStore, T: TickSource, W: WaitChannel> {
    cache: &'a BlockCache<S, T, W>,
    slot: usize,
    id: BlockId,
}

impl<S: BlockStore, T: TickSource, W: WaitChannel> BlockPin<'_, S, T, W> {
    /// Identity this pin keeps resident.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }
}

impl<S: BlockStore, T: TickSource, W: WaitChannel> Drop for BlockPin<'_, S, T, W> {
    fn drop(&mut self) {
        self.cache.unpin(self.slot);
    }
}

impl<S: BlockStore, T: TickSource, W: WaitChannel> fmt::Debug for BlockPin<'_, S, T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockPin").field(&self.id).finish()
    }
}
