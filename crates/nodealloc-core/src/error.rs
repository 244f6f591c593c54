//! Allocation failure type.

use thiserror::Error;

/// The only caller-visible allocation failures.
///
/// Class-local and recoverable exhaustion are handled inside the arena and
/// never surface here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The system source refused the request, no OOM handler was installed,
    /// and no free block of a sufficient class could be reclaimed.
    #[error("out of memory: could not acquire {requested} bytes")]
    OutOfMemory { requested: usize },
    /// A size computation overflowed before any memory was requested.
    #[error("allocation size overflow: {count} x {size} bytes")]
    CapacityOverflow { count: usize, size: usize },
}

impl AllocError {
    /// Returns true for the out-of-memory variant.
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}
