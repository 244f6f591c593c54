//! Two-tier node arena.
//!
//! Requests up to `MAX_BYTES` are served from per-class free lists backed by
//! the chunk pool. Larger requests go straight to the system source and are
//! never pooled. Small blocks stay in the arena once acquired: deallocation
//! only relinks them, and regions are handed back when the arena is dropped.

#![allow(unsafe_code)]

use core::ptr::NonNull;

use parking_lot::lock_api::{Mutex, RawMutex};
use serde::Serialize;

use crate::config::ArenaConfig;
use crate::error::AllocError;
use crate::guard::{DefaultLock, NoLock};
use crate::log::ArenaEvent;
use crate::metrics::{ArenaMetrics, MetricsSnapshot};
use crate::pool::PoolState;
use crate::size_class::{NUM_CLASSES, is_pooled, round_up};
use crate::system::{DefaultSource, OomHandler, RawSource, SystemAdapter};

/// Point-in-time view of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    /// Cumulative bytes acquired for the pool.
    pub heap_bytes_acquired: usize,
    /// Bytes left in the current pool window.
    pub pool_bytes_available: usize,
    /// Free blocks per class.
    pub free_blocks: [usize; NUM_CLASSES],
    /// Bytes held on the free lists.
    pub free_bytes: usize,
    /// Regions acquired for the pool.
    pub regions: usize,
    pub metrics: MetricsSnapshot,
}

/// Size-classed node allocator.
///
/// `S` is where memory comes from; `R` guards the pool. The default lock is
/// parking_lot's mutex when the `threads` feature is on.
pub struct Arena<S: RawSource = DefaultSource, R: RawMutex = DefaultLock> {
    state: Mutex<R, PoolState>,
    system: SystemAdapter<S>,
}

/// Arena without synchronization. It is `!Sync`.
pub type LocalArena<S = DefaultSource> = Arena<S, NoLock>;

impl Arena {
    /// Arena over the default system source.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_config(DefaultSource::new(), ArenaConfig::new())
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RawSource> Arena<S, DefaultLock> {
    /// Arena over `source` with the default configuration.
    #[must_use]
    pub const fn with_source(source: S) -> Self {
        Self::with_parts(source, ArenaConfig::new())
    }

    /// Arena over `source` with `config`.
    #[must_use]
    pub const fn with_config(source: S, config: ArenaConfig) -> Self {
        Self::with_parts(source, config)
    }
}

impl<S: RawSource, R: RawMutex> Arena<S, R> {
    /// Arena over `source` with `config`, for any lock type.
    #[must_use]
    pub const fn with_parts(source: S, config: ArenaConfig) -> Self {
        Self {
            state: Mutex::const_new(R::INIT, PoolState::new(config.chunk_objects)),
            system: SystemAdapter::new(source, &config),
        }
    }

    /// Returns a block of at least `n` bytes, aligned to `ALIGN`.
    ///
    /// `n == 0` is served as `n == 1`. Only final exhaustion is reported; a
    /// miss on one class is recovered from the pool, the system, or a free
    /// block of a larger class.
    pub fn allocate(&self, n: usize) -> Result<NonNull<u8>, AllocError> {
        let n = n.max(1);
        if !is_pooled(n) {
            return self.allocate_large(n);
        }
        self.state.lock().allocate(n, &self.system)
    }

    fn allocate_large(&self, n: usize) -> Result<NonNull<u8>, AllocError> {
        let ptr = match self.system.acquire(n) {
            Some(ptr) => ptr,
            None => {
                let heap = self.state.lock().heap_size();
                self.system.acquire_or_die(n, heap)?
            }
        };
        ArenaMetrics::inc(&self.system.metrics().large_allocations);
        Ok(ptr)
    }

    /// Returns a block obtained from [`Arena::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` or `reallocate` on this arena with a
    /// size `n` such that `round_up(n)` equals the requested size rounded up
    /// (exactly equal above `MAX_BYTES`). It must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, n: usize) {
        let n = n.max(1);
        if is_pooled(n) {
            // SAFETY: caller hands back a pooled block of this class.
            unsafe { self.state.lock().deallocate(ptr, n) };
        } else {
            // SAFETY: large blocks come straight from the source with this size.
            unsafe { self.system.release(ptr, n) };
            ArenaMetrics::inc(&self.system.metrics().large_releases);
        }
    }

    /// Resizes a block, preserving `min(old_n, new_n)` leading bytes.
    ///
    /// When both sizes are above `MAX_BYTES` the source resizes in place;
    /// when both round to the same class the block itself is returned. On
    /// error the original block is untouched and still owned by the caller.
    ///
    /// # Safety
    ///
    /// Same contract as [`Arena::deallocate`] for `ptr` and `old_n`.
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let (old_n, new_n) = (old_n.max(1), new_n.max(1));
        if !is_pooled(old_n) && !is_pooled(new_n) {
            // SAFETY: both ends are system blocks; forwarded contract.
            let out = match unsafe { self.system.resize(ptr, old_n, new_n) } {
                Some(out) => out,
                None => {
                    let heap = self.state.lock().heap_size();
                    // SAFETY: the failed attempt left ptr owned by the caller.
                    unsafe { self.system.resize_or_die(ptr, old_n, new_n, heap)? }
                }
            };
            ArenaMetrics::inc(&self.system.metrics().large_resizes);
            return Ok(out);
        }
        if is_pooled(old_n) && is_pooled(new_n) && round_up(old_n) == round_up(new_n) {
            return Ok(ptr);
        }
        let fresh = self.allocate(new_n)?;
        // SAFETY: distinct live blocks, each at least min(old_n, new_n) long;
        // ptr is released only after the copy.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), old_n.min(new_n));
            self.deallocate(ptr, old_n);
        }
        Ok(fresh)
    }

    /// Installs (or with `None` removes) the OOM handler, returning the
    /// previous one.
    ///
    /// The handler may run while the arena lock is held. It must not allocate
    /// from or deallocate to this arena, but it may replace or remove itself
    /// through this method.
    pub fn set_oom_handler(&self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.system.set_oom_handler(handler)
    }

    /// Snapshot of pool occupancy and counters.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let state = self.state.lock();
        ArenaStats {
            heap_bytes_acquired: state.heap_size(),
            pool_bytes_available: state.pool_bytes(),
            free_blocks: state.lists().lens(),
            free_bytes: state.lists().free_bytes(),
            regions: state.region_count(),
            metrics: self.system.metrics().snapshot(),
        }
    }

    /// Retained lifecycle records, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<ArenaEvent> {
        self.system.events().lock().snapshot()
    }

    /// Takes the retained lifecycle records, oldest first.
    pub fn drain_events(&self) -> Vec<ArenaEvent> {
        self.system.events().lock().drain()
    }

    /// Records lost to the ring capacity.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.system.events().lock().dropped()
    }

    #[must_use]
    pub fn metrics(&self) -> &ArenaMetrics {
        self.system.metrics()
    }

    /// The system source backing this arena.
    #[must_use]
    pub fn source(&self) -> &S {
        self.system.source()
    }

    /// Blocks requested per refill.
    #[must_use]
    pub fn chunk_objects(&self) -> usize {
        self.state.lock().chunk_objects()
    }
}

impl<S: RawSource, R: RawMutex> Drop for Arena<S, R> {
    fn drop(&mut self) {
        for region in self.state.get_mut().take_regions() {
            // SAFETY: each region was acquired from this source with this size
            // and no block inside it can be reached once the arena is gone.
            unsafe { self.system.release(region.ptr, region.bytes) };
        }
    }
}

impl<S: RawSource + core::fmt::Debug, R: RawMutex> core::fmt::Debug for Arena<S, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("source", self.system.source())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailureMode;
    use crate::log::ArenaEventKind;
    use crate::system::{Budget, BudgetedSource, StdHeap};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestArena = Arena<BudgetedSource<StdHeap>>;

    fn arena(budget: &Budget) -> TestArena {
        Arena::with_config(
            BudgetedSource::new(StdHeap::new(), budget.clone()),
            ArenaConfig::new().with_failure_mode(FailureMode::Error),
        )
    }

    #[test]
    fn lifo_reuse_within_class() {
        let a = arena(&Budget::new(usize::MAX));
        let p = a.allocate(24).unwrap();
        unsafe { a.deallocate(p, 24) };
        // 17..=24 share class 2
        assert_eq!(a.allocate(17).unwrap(), p);
    }

    #[test]
    fn zero_is_served_as_one_byte() {
        let a = arena(&Budget::new(usize::MAX));
        let p = a.allocate(0).unwrap();
        unsafe { a.deallocate(p, 0) };
        assert_eq!(a.allocate(8).unwrap(), p);
    }

    #[test]
    fn large_requests_bypass_the_pool() {
        let budget = Budget::new(10_000);
        let a = arena(&budget);
        let p = a.allocate(129).unwrap();
        assert_eq!(budget.remaining(), 10_000 - 129);
        let stats = a.stats();
        assert_eq!(stats.heap_bytes_acquired, 0);
        assert_eq!(stats.metrics.large_allocations, 1);
        unsafe { a.deallocate(p, 129) };
        assert_eq!(budget.remaining(), 10_000);
        assert_eq!(a.stats().metrics.large_releases, 1);
    }

    #[test]
    fn first_small_allocation_grows_pool() {
        let a = arena(&Budget::new(usize::MAX));
        a.allocate(8).unwrap();
        let stats = a.stats();
        assert_eq!(stats.heap_bytes_acquired, 320);
        assert_eq!(stats.pool_bytes_available, 160);
        assert_eq!(stats.free_blocks[0], 19);
        assert_eq!(stats.regions, 1);
        let kinds: Vec<_> = a.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ArenaEventKind::ChunkGrowth, ArenaEventKind::Refill]);
    }

    #[test]
    fn reallocate_same_class_keeps_block() {
        let a = arena(&Budget::new(usize::MAX));
        let p = a.allocate(10).unwrap();
        assert_eq!(unsafe { a.reallocate(p, 10, 16) }.unwrap(), p);
    }

    #[test]
    fn reallocate_across_classes_copies_prefix() {
        let a = arena(&Budget::new(usize::MAX));
        let p = a.allocate(16).unwrap();
        unsafe { p.as_ptr().copy_from_nonoverlapping([7u8; 16].as_ptr(), 16) };
        let q = unsafe { a.reallocate(p, 16, 200) }.unwrap();
        assert_ne!(p, q);
        let prefix = unsafe { core::slice::from_raw_parts(q.as_ptr(), 16) };
        assert!(prefix.iter().all(|&b| b == 7));
        // the old block went back to its list
        assert_eq!(a.allocate(16).unwrap(), p);
        let r = unsafe { a.reallocate(q, 200, 300) }.unwrap();
        assert_eq!(a.stats().metrics.large_resizes, 1);
        unsafe { a.deallocate(r, 300) };
    }

    #[test]
    fn reallocate_failure_leaves_original_intact() {
        let budget = Budget::new(usize::MAX);
        let a = arena(&budget);
        let p = a.allocate(64).unwrap();
        unsafe { p.as_ptr().write_bytes(3, 64) };
        budget.exhaust();
        assert!(unsafe { a.reallocate(p, 64, 4096) }.unwrap_err().is_out_of_memory());
        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 3));
    }

    #[test]
    fn oom_handler_runs_then_retry_succeeds() {
        let budget = Budget::new(0);
        let a = arena(&budget);
        let calls = Arc::new(AtomicUsize::new(0));
        let handler: OomHandler = {
            let calls = Arc::clone(&calls);
            let budget = budget.clone();
            Arc::new(move || {
                calls.fetch_add(1, Ordering::Relaxed);
                budget.grant(4096);
            })
        };
        a.set_oom_handler(Some(handler));
        a.allocate(8).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        let stats = a.stats();
        assert_eq!(stats.metrics.oom_handler_calls, 1);
        assert_eq!(stats.heap_bytes_acquired, 320);
        assert!(
            a.events()
                .iter()
                .any(|e| e.kind == ArenaEventKind::ChunkGrowth && e.outcome == "after_oom_handler")
        );
    }

    #[test]
    fn drop_returns_every_region() {
        let budget = Budget::new(1 << 20);
        {
            let a = arena(&budget);
            for n in 1..=128 {
                a.allocate(n).unwrap();
            }
            assert!(budget.remaining() < 1 << 20);
        }
        assert_eq!(budget.remaining(), 1 << 20);
    }

    #[test]
    fn drain_events_empties_log() {
        let a = arena(&Budget::new(usize::MAX));
        a.allocate(32).unwrap();
        assert_eq!(a.drain_events().len(), 2);
        assert!(a.events().is_empty());
        assert_eq!(a.dropped_events(), 0);
    }

    #[test]
    fn stats_serialize() {
        let a = arena(&Budget::new(usize::MAX));
        a.allocate(8).unwrap();
        let json = serde_json::to_value(a.stats()).unwrap();
        assert_eq!(json["heap_bytes_acquired"], 320);
        assert_eq!(json["metrics"]["refills"], 1);
        assert_eq!(json["free_blocks"].as_array().map(Vec::len), Some(NUM_CLASSES));
    }

    #[test]
    fn local_arena_works_on_one_thread() {
        let a: LocalArena<StdHeap> = LocalArena::with_parts(StdHeap::new(), ArenaConfig::new());
        let p = a.allocate(48).unwrap();
        unsafe { a.deallocate(p, 48) };
        assert_eq!(a.allocate(48).unwrap(), p);
        assert_eq!(a.chunk_objects(), 20);
    }
}
