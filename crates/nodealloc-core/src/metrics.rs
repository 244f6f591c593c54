//! Atomic counters for arena observability.
//!
//! All counters use relaxed ordering. They are diagnostic only and are bumped
//! on slow paths and on the large-object bypass, never on a free-list hit.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-arena operation counters.
#[derive(Debug)]
pub struct ArenaMetrics {
    /// Free-list refills from the pool.
    pub refills: AtomicU64,
    /// Regions acquired from the system for the pool.
    pub chunk_growths: AtomicU64,
    /// Pool remainders pushed onto their own class.
    pub leftovers_recycled: AtomicU64,
    /// Free blocks reclaimed as a pool window.
    pub cannibalizations: AtomicU64,
    /// Requests above the ceiling sent to the system.
    pub large_allocations: AtomicU64,
    /// Large blocks handed back to the system.
    pub large_releases: AtomicU64,
    /// Large blocks resized in place by the system.
    pub large_resizes: AtomicU64,
    /// OOM handler invocations.
    pub oom_handler_calls: AtomicU64,
    /// Final exhaustion events.
    pub out_of_memory: AtomicU64,
}

impl ArenaMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            refills: AtomicU64::new(0),
            chunk_growths: AtomicU64::new(0),
            leftovers_recycled: AtomicU64::new(0),
            cannibalizations: AtomicU64::new(0),
            large_allocations: AtomicU64::new(0),
            large_releases: AtomicU64::new(0),
            large_resizes: AtomicU64::new(0),
            oom_handler_calls: AtomicU64::new(0),
            out_of_memory: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            refills: Self::get(&self.refills),
            chunk_growths: Self::get(&self.chunk_growths),
            leftovers_recycled: Self::get(&self.leftovers_recycled),
            cannibalizations: Self::get(&self.cannibalizations),
            large_allocations: Self::get(&self.large_allocations),
            large_releases: Self::get(&self.large_releases),
            large_resizes: Self::get(&self.large_resizes),
            oom_handler_calls: Self::get(&self.oom_handler_calls),
            out_of_memory: Self::get(&self.out_of_memory),
        }
    }
}

impl Default for ArenaMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`ArenaMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub refills: u64,
    pub chunk_growths: u64,
    pub leftovers_recycled: u64,
    pub cannibalizations: u64,
    pub large_allocations: u64,
    pub large_releases: u64,
    pub large_resizes: u64,
    pub oom_handler_calls: u64,
    pub out_of_memory: u64,
}
