use kernel_addresses::PhysicalAddress;

/// Recoverable allocation failure.
///
/// Exhaustion is an operating condition: the caller may shed load, retry
/// later, or abort the requesting operation. No retry happens inside the
/// allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("out of physical frames")]
    OutOfFrames,
}

/// Caller-contract violation on a frame operation.
///
/// These are not operating conditions. A fault means reference bookkeeping
/// or an address computation is already corrupted; the embedder must treat
/// any of these as fatal and halt rather than continue on bad state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameFault {
    #[error("address {0} is not frame-aligned")]
    Misaligned(PhysicalAddress),
    #[error("address {0} is outside the managed range")]
    OutOfRange(PhysicalAddress),
    #[error("free of frame {0} whose reference count is already zero")]
    FreeOfFree(PhysicalAddress),
    #[error("reference added to frame {0} whose reference count is zero")]
    RetainOfFree(PhysicalAddress),
}

/// Invalid pool geometry passed to the one-shot constructor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("managed range contains no complete frame")]
    EmptyRange,
    #[error("shard count must be at least one")]
    NoShards,
    #[error("managed range exceeds the addressable frame index space")]
    TooManyFrames,
}
