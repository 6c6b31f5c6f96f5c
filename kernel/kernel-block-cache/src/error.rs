/// Unrecoverable cache failure.
///
/// Working sets are sized to stay under pool capacity, so an exhausted pool
/// means references leaked somewhere. The embedder must treat this as fatal
/// and halt; retrying cannot help and continuing risks running on corrupted
/// bookkeeping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheFault {
    #[error("no evictable slot: every slot in the pool is referenced")]
    PoolExhausted,
}

/// Invalid pool geometry passed to the one-shot constructor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("slot count must be at least one")]
    NoSlots,
    #[error("bucket count must be at least one")]
    NoBuckets,
    #[error("slot count exceeds the addressable slot index space")]
    TooManySlots,
}
