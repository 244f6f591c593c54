//! Size classes for pooled allocations.
//!
//! Requests up to `MAX_BYTES` are rounded up to a multiple of `ALIGN` and
//! served from one of `NUM_CLASSES` free lists. Class `i` holds blocks of
//! exactly `(i + 1) * ALIGN` bytes. Requests above `MAX_BYTES` bypass the
//! pool entirely.

/// Granularity of every pooled block (bytes).
pub const ALIGN: usize = 8;

/// Largest request served from the pool (bytes). Above this, go to the system.
pub const MAX_BYTES: usize = 128;

/// Number of size-class free lists.
pub const NUM_CLASSES: usize = MAX_BYTES / ALIGN;

const _: () = assert!(ALIGN.is_power_of_two());
const _: () = assert!(ALIGN >= core::mem::size_of::<usize>());
const _: () = assert!(MAX_BYTES % ALIGN == 0);

/// Rounds `bytes` up to the next multiple of `ALIGN`.
#[inline]
#[must_use]
pub const fn round_up(bytes: usize) -> usize {
    (bytes + ALIGN - 1) & !(ALIGN - 1)
}

/// Returns the class index serving a request of `bytes`.
///
/// `bytes` must be in `1..=MAX_BYTES`.
#[inline]
#[must_use]
pub const fn class_of(bytes: usize) -> usize {
    debug_assert!(bytes >= 1 && bytes <= MAX_BYTES);
    (bytes + ALIGN - 1) / ALIGN - 1
}

/// Returns the block size handed out by class `index`.
#[inline]
#[must_use]
pub const fn class_size(index: usize) -> usize {
    (index + 1) * ALIGN
}

/// True if a request of `bytes` is served from the pool.
#[inline]
#[must_use]
pub const fn is_pooled(bytes: usize) -> bool {
    bytes <= MAX_BYTES
}
