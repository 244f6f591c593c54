//! Raw block views.
//!
//! A pooled block is either live client storage or, while it sits on a free
//! list, a node whose first word links to the next free block of the same
//! class. `RawBlock` is the only place that reinterprets client bytes as a
//! link; everything else treats blocks as opaque addresses.

#![allow(unsafe_code)]

use core::ptr::NonNull;

use crate::size_class::ALIGN;

/// In-band link stored in the first word of a free block.
type Link = Option<NonNull<u8>>;

const _: () = assert!(core::mem::size_of::<Link>() <= ALIGN);
const _: () = assert!(core::mem::align_of::<Link>() <= ALIGN);

/// Address of one pooled block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawBlock(NonNull<u8>);

impl RawBlock {
    /// Wraps a block address.
    ///
    /// # Safety
    ///
    /// `ptr` must be `ALIGN`-aligned and valid for writes of at least one
    /// `ALIGN`-sized word for as long as the block is linked.
    #[inline]
    pub(crate) unsafe fn from_ptr(ptr: NonNull<u8>) -> Self {
        debug_assert_eq!(ptr.as_ptr() as usize % ALIGN, 0, "misaligned block");
        Self(ptr)
    }

    /// Opaque-bytes view: the address handed to clients.
    #[inline]
    pub(crate) fn as_ptr(self) -> NonNull<u8> {
        self.0
    }

    /// Block at `index * size` bytes past this one.
    ///
    /// # Safety
    ///
    /// The resulting address must stay inside the region this block was
    /// carved from.
    #[inline]
    pub(crate) unsafe fn offset(self, index: usize, size: usize) -> Self {
        // SAFETY: caller keeps the offset inside one acquired region.
        Self(unsafe { self.0.add(index * size) })
    }

    /// Next-link view: overwrites the block's first word with `next`.
    ///
    /// # Safety
    ///
    /// The block must not be client-owned; the client gave up its bytes when
    /// the block was deallocated or has not received them yet.
    #[inline]
    pub(crate) unsafe fn set_next(self, next: Option<RawBlock>) {
        let link: Link = next.map(RawBlock::as_ptr);
        // SAFETY: the block is ALIGN-aligned and at least one word long.
        unsafe { self.0.cast::<Link>().write(link) };
    }

    /// Next-link view: reads the successor stored by `set_next`.
    ///
    /// # Safety
    ///
    /// The block must currently be linked on a free list.
    #[inline]
    pub(crate) unsafe fn next(self) -> Option<RawBlock> {
        // SAFETY: a linked block's first word was written by `set_next`.
        let link = unsafe { self.0.cast::<Link>().read() };
        link.map(RawBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Cells([u8; 32]);

    #[test]
    fn test_link_roundtrip_inside_block_bytes() {
        let mut cells = Cells([0xAA; 32]);
        let base = NonNull::new(cells.0.as_mut_ptr()).unwrap();
        unsafe {
            let a = RawBlock::from_ptr(base);
            let b = a.offset(1, 16);
            a.set_next(Some(b));
            b.set_next(None);
            assert_eq!(a.next(), Some(b));
            assert_eq!(b.next(), None);
        }
        // Only the first word of each block is touched.
        assert!(cells.0[8..16].iter().all(|&x| x == 0xAA));
        assert!(cells.0[24..32].iter().all(|&x| x == 0xAA));
    }

    #[test]
    fn test_offset_steps_by_block_size() {
        let mut cells = Cells([0; 32]);
        let base = NonNull::new(cells.0.as_mut_ptr()).unwrap();
        let a = unsafe { RawBlock::from_ptr(base) };
        let c = unsafe { a.offset(3, 8) };
        assert_eq!(c.as_ptr().as_ptr() as usize - base.as_ptr() as usize, 24);
    }
}
