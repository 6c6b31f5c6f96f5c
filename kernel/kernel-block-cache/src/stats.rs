use core::sync::atomic::{AtomicU64, Ordering};

/// Monotonic operation counters, updated with relaxed atomics.
#[derive(Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub slow_paths: AtomicU64,
    pub local_evictions: AtomicU64,
    pub cross_bucket_steals: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            slow_paths: self.slow_paths.load(Ordering::Relaxed),
            local_evictions: self.local_evictions.load(Ordering::Relaxed),
            cross_bucket_steals: self.cross_bucket_steals.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the cache's operation counters.
///
/// `hits` counts identity matches on either lookup path; `slow_paths`
/// counts entries into the pool-locked path, so a hit that never left the
/// home bucket leaves it unchanged. Evictions split into in-bucket
/// (`local_evictions`) and cross-bucket (`cross_bucket_steals`).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub slow_paths: u64,
    pub local_evictions: u64,
    pub cross_bucket_steals: u64,
}
