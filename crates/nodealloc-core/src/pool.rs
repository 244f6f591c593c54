//! Chunk pool and free-list refill.
//!
//! The pool is a bump window `[start, start + len)` into the most recently
//! acquired region. Refills carve `chunk_objects` blocks from it at once. When
//! the window cannot supply even one block it is replenished, in order of
//! preference:
//!
//! 1. Recycle the remainder onto its own exact class (it is a multiple of
//!    `ALIGN` and smaller than the block being served, so it always fits one).
//! 2. Acquire `2 * needed + round_up(heap_size / 16)` bytes from the system.
//! 3. Cannibalize: reuse one free block of a class at least the requested
//!    size as the new window.
//! 4. Acquire again through the OOM handler, then fail.
//!
//! Everything in this module runs under the arena lock.

#![allow(unsafe_code)]

use core::ptr::NonNull;

use crate::block::RawBlock;
use crate::error::AllocError;
use crate::free_list::FreeListBank;
use crate::log::{ArenaEventKind, EventFields};
use crate::metrics::ArenaMetrics;
use crate::size_class::{NUM_CLASSES, class_of, class_size, round_up};
use crate::system::{RawSource, SystemAdapter};

/// Bump window into the current region.
#[derive(Debug, Clone, Copy)]
struct PoolWindow {
    start: Option<NonNull<u8>>,
    len: usize,
}

impl PoolWindow {
    const EMPTY: Self = Self {
        start: None,
        len: 0,
    };

    fn new(start: NonNull<u8>, len: usize) -> Self {
        Self {
            start: Some(start),
            len,
        }
    }

    /// Takes `bytes` off the front. Requires `bytes <= self.len`.
    fn carve(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        debug_assert!(bytes <= self.len);
        let start = self.start?;
        if bytes == self.len {
            *self = Self::EMPTY;
        } else {
            // SAFETY: bytes < len, so the new start stays inside the window.
            self.start = Some(unsafe { start.add(bytes) });
            self.len -= bytes;
        }
        Some(start)
    }

    /// Gives up whatever is left, returning it.
    fn take(&mut self) -> Option<(NonNull<u8>, usize)> {
        let out = self.start.map(|start| (start, self.len));
        *self = Self::EMPTY;
        out.filter(|&(_, len)| len > 0)
    }
}

/// A region acquired from the system, kept for teardown.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Region {
    pub(crate) ptr: NonNull<u8>,
    pub(crate) bytes: usize,
}

/// Free lists, pool window and growth bookkeeping.
pub(crate) struct PoolState {
    lists: FreeListBank,
    window: PoolWindow,
    /// Cumulative bytes ever acquired for the pool. Never decreases while the
    /// arena lives; drives the growth term of the next request.
    heap_size: usize,
    regions: Vec<Region>,
    chunk_objects: usize,
}

// SAFETY: every pointer in the pool refers to memory owned exclusively by this
// state (the regions it acquired), so moving it to another thread moves that
// ownership along with it.
unsafe impl Send for PoolState {}

impl PoolState {
    pub(crate) const fn new(chunk_objects: usize) -> Self {
        Self {
            lists: FreeListBank::new(),
            window: PoolWindow::EMPTY,
            heap_size: 0,
            regions: Vec::new(),
            chunk_objects: if chunk_objects == 0 { 1 } else { chunk_objects },
        }
    }

    /// Serves a pooled request of `bytes` (`1..=MAX_BYTES`).
    pub(crate) fn allocate<S: RawSource>(
        &mut self,
        bytes: usize,
        system: &SystemAdapter<S>,
    ) -> Result<NonNull<u8>, AllocError> {
        let class = class_of(bytes);
        // SAFETY: lists only ever hold blocks this state linked.
        if let Some(block) = unsafe { self.lists.pop(class) } {
            return Ok(block);
        }
        self.refill(round_up(bytes), system)
    }

    /// Returns a pooled block to its class.
    ///
    /// # Safety
    ///
    /// `block` must have come from `allocate` on this state with a size that
    /// rounds to the same class, and must not be used again by the caller.
    #[inline]
    pub(crate) unsafe fn deallocate(&mut self, block: NonNull<u8>, bytes: usize) {
        // SAFETY: caller returns ownership of a block of this class.
        unsafe { self.lists.push(class_of(bytes), block) }
    }

    /// Refills the list for blocks of `size` and returns one block.
    fn refill<S: RawSource>(
        &mut self,
        size: usize,
        system: &SystemAdapter<S>,
    ) -> Result<NonNull<u8>, AllocError> {
        let (first, nobjs) = self.chunk_alloc(size, self.chunk_objects, system)?;
        let class = class_of(size);
        ArenaMetrics::inc(&system.metrics().refills);
        system.record(
            ArenaEventKind::Refill,
            EventFields::new(self.heap_size, if nobjs == 1 { "single" } else { "chunk" })
                .size(size)
                .class(class)
                .bytes(nobjs * size),
        );
        if nobjs > 1 {
            // SAFETY: the chunk is nobjs contiguous blocks carved from a region
            // we own; block 0 goes to the caller, the rest are linked.
            unsafe {
                let rest = RawBlock::from_ptr(first).offset(1, size).as_ptr();
                self.lists.push_run(class, rest, nobjs - 1);
            }
        }
        Ok(first)
    }

    /// Carves up to `nobjs` blocks of `size` from the pool, growing it if it
    /// cannot supply even one. Returns the chunk start and the count carved,
    /// which is at least 1.
    fn chunk_alloc<S: RawSource>(
        &mut self,
        size: usize,
        nobjs: usize,
        system: &SystemAdapter<S>,
    ) -> Result<(NonNull<u8>, usize), AllocError> {
        let needed = size
            .checked_mul(nobjs)
            .ok_or(AllocError::CapacityOverflow { count: nobjs, size })?;
        if let Some(chunk) = self.carve(size, nobjs, needed) {
            return Ok(chunk);
        }
        self.replenish(size, needed, system)?;
        self.carve(size, nobjs, needed)
            .ok_or(AllocError::OutOfMemory { requested: needed })
    }

    fn carve(&mut self, size: usize, nobjs: usize, needed: usize) -> Option<(NonNull<u8>, usize)> {
        let left = self.window.len;
        if left >= needed {
            return self.window.carve(needed).map(|p| (p, nobjs));
        }
        if left >= size {
            let n = left / size;
            return self.window.carve(n * size).map(|p| (p, n));
        }
        None
    }

    /// Installs a new window large enough for at least one block of `size`.
    fn replenish<S: RawSource>(
        &mut self,
        size: usize,
        needed: usize,
        system: &SystemAdapter<S>,
    ) -> Result<(), AllocError> {
        let bytes_to_get = needed
            .checked_mul(2)
            .and_then(|b| b.checked_add(round_up(self.heap_size >> 4)))
            .ok_or(AllocError::CapacityOverflow { count: 2, size: needed })?;

        self.recycle_leftover(system);

        if let Some(region) = system.acquire(bytes_to_get) {
            self.adopt_region(region, bytes_to_get, size, "acquired", system);
            return Ok(());
        }
        if self.cannibalize(size, system) {
            return Ok(());
        }
        let region = system.acquire_or_die(bytes_to_get, self.heap_size)?;
        self.adopt_region(region, bytes_to_get, size, "after_oom_handler", system);
        Ok(())
    }

    /// Pushes the window remainder onto its own class and empties the window.
    fn recycle_leftover<S: RawSource>(&mut self, system: &SystemAdapter<S>) {
        let Some((start, len)) = self.window.take() else {
            return;
        };
        let class = class_of(len);
        // SAFETY: the remainder is unowned pool memory of exactly class_size(class).
        unsafe { self.lists.push(class, start) };
        ArenaMetrics::inc(&system.metrics().leftovers_recycled);
        system.record(
            ArenaEventKind::LeftoverRecycled,
            EventFields::new(self.heap_size, "recycled").class(class).bytes(len),
        );
    }

    /// Reclaims one free block of a class `>= class_of(size)` as the window.
    fn cannibalize<S: RawSource>(&mut self, size: usize, system: &SystemAdapter<S>) -> bool {
        for class in class_of(size)..NUM_CLASSES {
            // SAFETY: lists only ever hold blocks this state linked.
            let Some(block) = (unsafe { self.lists.pop(class) }) else {
                continue;
            };
            let bytes = class_size(class);
            self.window = PoolWindow::new(block, bytes);
            ArenaMetrics::inc(&system.metrics().cannibalizations);
            system.record(
                ArenaEventKind::Cannibalized,
                EventFields::new(self.heap_size, "reclaimed")
                    .size(size)
                    .class(class)
                    .bytes(bytes),
            );
            return true;
        }
        false
    }

    fn adopt_region<S: RawSource>(
        &mut self,
        ptr: NonNull<u8>,
        bytes: usize,
        size: usize,
        outcome: &'static str,
        system: &SystemAdapter<S>,
    ) {
        self.window = PoolWindow::new(ptr, bytes);
        self.heap_size += bytes;
        self.regions.push(Region { ptr, bytes });
        ArenaMetrics::inc(&system.metrics().chunk_growths);
        system.record(
            ArenaEventKind::ChunkGrowth,
            EventFields::new(self.heap_size, outcome).size(size).bytes(bytes),
        );
    }

    /// Hands every acquired region back for release, emptying the pool.
    pub(crate) fn take_regions(&mut self) -> Vec<Region> {
        self.lists = FreeListBank::new();
        self.window = PoolWindow::EMPTY;
        std::mem::take(&mut self.regions)
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub(crate) fn pool_bytes(&self) -> usize {
        self.window.len
    }

    pub(crate) fn lists(&self) -> &FreeListBank {
        &self.lists
    }

    pub(crate) fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub(crate) fn chunk_objects(&self) -> usize {
        self.chunk_objects
    }
}
