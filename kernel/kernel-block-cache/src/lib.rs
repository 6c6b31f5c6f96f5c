//! # Disk Block Cache
//!
//! A fixed pool of in-memory slots holding copies of on-disk blocks. The
//! cache is both a read accelerator and the synchronization point for
//! blocks shared between processes: at any instant, at most one slot in the
//! pool holds a given `(device, block)` identity, and that slot's content
//! is only reachable under an exclusive sleep lock.
//!
//! The slot pool is partitioned into hash buckets (block number modulo
//! bucket count), each with its own spin lock, so the common case, a hit
//! in the home bucket, touches exactly one lock. Misses fall back to a
//! coarse pool-wide lock and may repurpose ("evict") an unreferenced slot,
//! stolen from another bucket if the home bucket has none. Recency is
//! approximated with a tick stamp taken when a slot's last reference goes
//! away; eviction picks the smallest stamp it sees.
//!
//! Consumer protocol: [`BlockCache::fetch`] → read or mutate through the
//! guard → [`BlockGuard::commit`] if mutated → drop the guard. A
//! collaborator that must keep a block resident without holding its content
//! lock (a transaction log holding committed blocks alive) takes a
//! [`BlockPin`].
//!
//! [`CacheFault`] is fatal by contract: the pool only runs dry when
//! reference bookkeeping leaked, and the embedder must halt rather than
//! run on.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod cache;
mod error;
mod guard;
mod slot;
mod stats;
mod store;

pub use cache::{BlockCache, DEFAULT_BUCKET_COUNT};
pub use error::{CacheFault, GeometryError};
pub use guard::{BlockGuard, BlockPin};
pub use stats::CacheStats;
pub use store::{BlockStore, TickSource};

/// Size of one cached block in bytes.
pub const BLOCK_SIZE: usize = 1024;

/// Content of one cached block.
pub type BlockData = [u8; BLOCK_SIZE];

/// Identity of a block on persistent storage.
///
/// Device `u32::MAX` together with block number `u32::MAX` is reserved for
/// unbound cache slots and must not be fetched.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub device: u32,
    pub number: u32,
}

impl BlockId {
    #[must_use]
    pub const fn new(device: u32, number: u32) -> Self {
        Self { device, number }
    }

    /// One-word form used for atomic identity compares.
    pub(crate) const fn pack(self) -> u64 {
        (self.device as u64) << 32 | self.number as u64
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn unpack(word: u64) -> Self {
        Self {
            device: (word >> 32) as u32,
            number: word as u32,
        }
    }
}
