//! Typed element adapter over an [`Arena`].
//!
//! Scales element counts to byte sizes for container code. Zero-length and
//! zero-sized requests never reach the arena and yield a dangling pointer.

#![allow(unsafe_code)]

use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use parking_lot::lock_api::RawMutex;

use crate::arena::Arena;
use crate::error::AllocError;
use crate::guard::DefaultLock;
use crate::size_class::ALIGN;
use crate::system::{DefaultSource, RawSource};

/// Allocates arrays of `T` from a borrowed arena.
pub struct TypedAlloc<'a, T, S: RawSource = DefaultSource, R: RawMutex = DefaultLock> {
    arena: &'a Arena<S, R>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, S: RawSource, R: RawMutex> TypedAlloc<'a, T, S, R> {
    /// Binds to `arena`. `T` must not need more than `ALIGN` alignment.
    #[must_use]
    pub const fn new(arena: &'a Arena<S, R>) -> Self {
        const { assert!(align_of::<T>() <= ALIGN, "element alignment exceeds arena alignment") };
        Self {
            arena,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn arena(&self) -> &'a Arena<S, R> {
        self.arena
    }

    /// Same arena, different element type.
    #[must_use]
    pub const fn rebind<U>(&self) -> TypedAlloc<'a, U, S, R> {
        TypedAlloc::new(self.arena)
    }

    /// Largest element count whose byte size is representable.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        let size = size_of::<T>();
        if size == 0 { usize::MAX } else { usize::MAX / size }
    }

    fn byte_len(count: usize) -> Result<usize, AllocError> {
        count
            .checked_mul(size_of::<T>())
            .ok_or(AllocError::CapacityOverflow {
                count,
                size: size_of::<T>(),
            })
    }

    /// Uninitialized storage for `count` elements.
    pub fn allocate(&self, count: usize) -> Result<NonNull<T>, AllocError> {
        let bytes = Self::byte_len(count)?;
        if bytes == 0 {
            return Ok(NonNull::dangling());
        }
        self.arena.allocate(bytes).map(NonNull::cast)
    }

    /// Releases storage from [`TypedAlloc::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from this adapter (or one on the same arena) with the
    /// same `count`, and must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, count: usize) {
        let bytes = count.saturating_mul(size_of::<T>());
        if bytes != 0 {
            // SAFETY: forwarded contract; the byte size matches the allocation.
            unsafe { self.arena.deallocate(ptr.cast(), bytes) }
        }
    }

    /// Moves storage for `old_count` elements into storage for `new_count`,
    /// preserving the leading `min` elements bitwise.
    ///
    /// # Safety
    ///
    /// Same contract as [`TypedAlloc::deallocate`] for `ptr` and `old_count`.
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<T>,
        old_count: usize,
        new_count: usize,
    ) -> Result<NonNull<T>, AllocError> {
        let old_bytes = Self::byte_len(old_count)?;
        let new_bytes = Self::byte_len(new_count)?;
        match (old_bytes, new_bytes) {
            (0, _) => self.allocate(new_count),
            (_, 0) => {
                // SAFETY: forwarded contract.
                unsafe { self.deallocate(ptr, old_count) };
                Ok(NonNull::dangling())
            }
            // SAFETY: forwarded contract.
            _ => unsafe { self.arena.reallocate(ptr.cast(), old_bytes, new_bytes) }
                .map(NonNull::cast),
        }
    }
}

impl<T, S: RawSource, R: RawMutex> Clone for TypedAlloc<'_, T, S, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, S: RawSource, R: RawMutex> Copy for TypedAlloc<'_, T, S, R> {}

/// Adapters compare equal when they draw from the same arena.
impl<T, U, S: RawSource, R: RawMutex> PartialEq<TypedAlloc<'_, U, S, R>> for TypedAlloc<'_, T, S, R> {
    fn eq(&self, other: &TypedAlloc<'_, U, S, R>) -> bool {
        core::ptr::eq(self.arena, other.arena)
    }
}

impl<T, S: RawSource, R: RawMutex> core::fmt::Debug for TypedAlloc<'_, T, S, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypedAlloc")
            .field("elem", &core::any::type_name::<T>())
            .field("arena", &(self.arena as *const Arena<S, R>))
            .finish()
    }
}
