use crate::{BLOCK_SIZE, BlockData};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64};
use kernel_sync::{SleepLock, WaitChannel};

/// Bucket-list terminator in the intrusive link cells.
pub(crate) const NIL: u32 = u32::MAX;

/// Identity word of a slot not bound to any block.
pub(crate) const NO_IDENT: u64 = u64::MAX;

/// One cache slot.
///
/// The metadata fields are atomics for soundness across the shared arena,
/// but the protocol is lock-governed: `ident` is written only during
/// eviction (pool lock plus the involved bucket locks held), `refs` and
/// `last_release` only under the slot's current home-bucket lock, and the
/// link cells only under the lock of the bucket whose list holds the slot.
/// `valid` transitions false→true under the content lock and true→false
/// during eviction, when a zero count guarantees no content holder exists.
pub(crate) struct Slot<W> {
    /// Packed [`BlockId`](crate::BlockId), or [`NO_IDENT`].
    pub ident: AtomicU64,
    /// Outstanding owners: content guards plus pins.
    pub refs: AtomicU32,
    /// Tick stamped when `refs` last fell to zero; eviction order key.
    pub last_release: AtomicU64,
    /// Content reflects the backing store for the current identity.
    pub valid: AtomicBool,
    pub prev: AtomicU32,
    pub next: AtomicU32,
    /// Exclusive content lock; all data access and transfer goes through
    /// its guard.
    pub content: SleepLock<BlockData, W>,
}

impl<W: WaitChannel> Slot<W> {
    pub(crate) fn unbound() -> Self {
        Self {
            ident: AtomicU64::new(NO_IDENT),
            refs: AtomicU32::new(0),
            last_release: AtomicU64::new(0),
            valid: AtomicBool::new(false),
            prev: AtomicU32::new(NIL),
            next: AtomicU32::new(NIL),
            content: SleepLock::new([0; BLOCK_SIZE]),
        }
    }
}
