//! Process-wide node arena.
//!
//! One lazily-populated `Arena` over the default system source, shared by
//! every thread. Requires the `threads` feature.

#![allow(unsafe_code)]

use core::ptr::NonNull;

use crate::arena::Arena;
use crate::error::AllocError;
use crate::system::OomHandler;

static NODE_ARENA: Arena = Arena::new();

/// The shared arena.
#[must_use]
pub fn node_arena() -> &'static Arena {
    &NODE_ARENA
}

/// [`Arena::allocate`] on the shared arena.
pub fn allocate(n: usize) -> Result<NonNull<u8>, AllocError> {
    NODE_ARENA.allocate(n)
}

/// [`Arena::deallocate`] on the shared arena.
///
/// # Safety
///
/// See [`Arena::deallocate`].
pub unsafe fn deallocate(ptr: NonNull<u8>, n: usize) {
    // SAFETY: forwarded contract.
    unsafe { NODE_ARENA.deallocate(ptr, n) }
}

/// [`Arena::reallocate`] on the shared arena.
///
/// # Safety
///
/// See [`Arena::reallocate`].
pub unsafe fn reallocate(
    ptr: NonNull<u8>,
    old_n: usize,
    new_n: usize,
) -> Result<NonNull<u8>, AllocError> {
    // SAFETY: forwarded contract.
    unsafe { NODE_ARENA.reallocate(ptr, old_n, new_n) }
}

/// [`Arena::set_oom_handler`] on the shared arena.
pub fn set_oom_handler(handler: Option<OomHandler>) -> Option<OomHandler> {
    NODE_ARENA.set_oom_handler(handler)
}
