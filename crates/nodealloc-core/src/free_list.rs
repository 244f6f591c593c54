//! Per-class intrusive free lists.
//!
//! Each size class keeps a LIFO singly-linked stack of free blocks. The link
//! lives inside the free block itself, so the bank costs one head pointer and
//! one counter per class regardless of how many blocks it holds.
//!
//! All operations require the arena lock.

#![allow(unsafe_code)]

use core::ptr::NonNull;

use crate::block::RawBlock;
use crate::size_class::{NUM_CLASSES, class_size};

/// One free list per size class.
pub(crate) struct FreeListBank {
    /// Head block per class.
    heads: [Option<RawBlock>; NUM_CLASSES],
    /// Number of linked blocks per class.
    lens: [usize; NUM_CLASSES],
}

impl FreeListBank {
    /// Creates a bank with every list empty.
    pub(crate) const fn new() -> Self {
        Self {
            heads: [None; NUM_CLASSES],
            lens: [0; NUM_CLASSES],
        }
    }

    /// Links `block` as the new head of `class`.
    ///
    /// # Safety
    ///
    /// `block` must be at least `class_size(class)` bytes, not client-owned,
    /// and not already linked anywhere.
    #[inline]
    pub(crate) unsafe fn push(&mut self, class: usize, block: NonNull<u8>) {
        // SAFETY: caller hands over an unowned, aligned block.
        unsafe {
            let block = RawBlock::from_ptr(block);
            block.set_next(self.heads[class]);
            self.heads[class] = Some(block);
        }
        self.lens[class] += 1;
    }

    /// Unlinks and returns the head of `class`, or `None` if the list is empty.
    ///
    /// # Safety
    ///
    /// Every block on the list must have been linked by this bank and left
    /// untouched since.
    #[inline]
    pub(crate) unsafe fn pop(&mut self, class: usize) -> Option<NonNull<u8>> {
        let head = self.heads[class]?;
        // SAFETY: head is linked, so its first word holds our link.
        self.heads[class] = unsafe { head.next() };
        self.lens[class] -= 1;
        Some(head.as_ptr())
    }

    /// Links `count` contiguous blocks of `class` starting at `first`.
    ///
    /// The blocks are pushed so they come back out in ascending address order.
    ///
    /// # Safety
    ///
    /// `[first, first + count * class_size(class))` must be unowned memory
    /// inside one acquired region.
    pub(crate) unsafe fn push_run(&mut self, class: usize, first: NonNull<u8>, count: usize) {
        if count == 0 {
            return;
        }
        let size = class_size(class);
        // SAFETY: caller guarantees the whole run is ours to link.
        unsafe {
            let first = RawBlock::from_ptr(first);
            let mut next = self.heads[class];
            for i in (0..count).rev() {
                let block = first.offset(i, size);
                block.set_next(next);
                next = Some(block);
            }
            self.heads[class] = next;
        }
        self.lens[class] += count;
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self, class: usize) -> bool {
        self.heads[class].is_none()
    }

    #[cfg(test)]
    pub(crate) fn len(&self, class: usize) -> usize {
        self.lens[class]
    }

    /// Per-class block counts.
    pub(crate) fn lens(&self) -> [usize; NUM_CLASSES] {
        self.lens
    }

    /// Total bytes held across every list.
    pub(crate) fn free_bytes(&self) -> usize {
        self.lens
            .iter()
            .enumerate()
            .map(|(class, &len)| len * class_size(class))
            .sum()
    }
}
