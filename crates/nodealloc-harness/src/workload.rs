//! Deterministic arena workloads.
//!
//! - [`run_stress`]: threads churn allocations of mixed sizes against one
//!   shared arena, stamping every live block with a canary and checking it
//!   before release.
//! - [`run_exhaustion`]: a budgeted arena is filled until it fails, optionally
//!   rescued by a bounded OOM handler, then partly freed and refilled with a
//!   smaller size so the pool has to cannibalize.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use nodealloc_core::{
    AllocError, Arena, ArenaConfig, ArenaEvent, ArenaStats, Budget, BudgetedSource, FailureMode,
    OomHandler, RawSource, StdHeap,
};
use serde::Serialize;

use crate::HarnessError;

/// Xorshift generator used by every workload.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform-ish value in `low..=high_inclusive`.
    pub fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        debug_assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

/// Parse a seed written in decimal or `0x` hex, with optional `_` separators.
pub fn parse_seed(raw: &str) -> Result<u64, HarnessError> {
    let cleaned = raw.trim().replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse::<u64>(),
    };
    parsed.map_err(|_| HarnessError::InvalidConfig(format!("invalid seed: '{raw}'")))
}

// ---------------------------------------------------------------------------
// Stress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StressConfig {
    pub threads: usize,
    pub ops_per_thread: usize,
    /// Largest request size; values above 128 exercise the bypass path.
    pub max_size: usize,
    /// Live blocks each thread keeps at most.
    pub live_cap: usize,
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            ops_per_thread: 100_000,
            max_size: 256,
            live_cap: 256,
            seed: 0xDEAD_BEEF,
        }
    }
}

impl StressConfig {
    fn validate(&self) -> Result<(), HarnessError> {
        if self.threads == 0 {
            return Err(HarnessError::InvalidConfig("threads must be at least 1".into()));
        }
        if self.max_size == 0 {
            return Err(HarnessError::InvalidConfig("max_size must be at least 1".into()));
        }
        if self.live_cap == 0 {
            return Err(HarnessError::InvalidConfig("live_cap must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreadReport {
    pub thread: usize,
    pub allocations: u64,
    pub deallocations: u64,
    pub corruptions: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub config: StressConfig,
    pub threads: Vec<ThreadReport>,
    pub allocations: u64,
    pub deallocations: u64,
    pub corruptions: u64,
    pub failures: u64,
    pub duration_ms: u64,
    pub stats: ArenaStats,
}

impl StressReport {
    /// No corrupted canaries and no allocation failures.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.corruptions == 0 && self.failures == 0
    }
}

struct LiveBlock {
    ptr: NonNull<u8>,
    size: usize,
    tag: u8,
}

fn canary(thread: usize, op: usize) -> u8 {
    ((thread.wrapping_mul(131) ^ op.wrapping_mul(31)) as u8) | 1
}

fn stamp(block: &LiveBlock) {
    // SAFETY: the block is live and at least `size` bytes long.
    unsafe { block.ptr.as_ptr().write_bytes(block.tag, block.size) };
}

fn intact(block: &LiveBlock) -> bool {
    // SAFETY: the block is live and at least `size` bytes long.
    let bytes = unsafe { std::slice::from_raw_parts(block.ptr.as_ptr(), block.size) };
    bytes.iter().all(|&b| b == block.tag)
}

fn churn<S: RawSource>(arena: &Arena<S>, thread: usize, config: &StressConfig) -> ThreadReport {
    let mut rng = XorShift64::new(config.seed ^ (thread as u64).wrapping_mul(0x9E37_79B9));
    let mut live: Vec<LiveBlock> = Vec::with_capacity(config.live_cap);
    let mut report = ThreadReport {
        thread,
        ..ThreadReport::default()
    };

    let release = |block: LiveBlock, report: &mut ThreadReport| {
        if !intact(&block) {
            report.corruptions += 1;
        }
        // SAFETY: the block came from this arena with this size.
        unsafe { arena.deallocate(block.ptr, block.size) };
        report.deallocations += 1;
    };

    for op in 0..config.ops_per_thread {
        let grow = live.is_empty() || (live.len() < config.live_cap && rng.gen_range(0, 2) > 0);
        if grow {
            let size = rng.gen_range(1, config.max_size);
            match arena.allocate(size) {
                Ok(ptr) => {
                    let block = LiveBlock {
                        ptr,
                        size,
                        tag: canary(thread, op),
                    };
                    stamp(&block);
                    live.push(block);
                    report.allocations += 1;
                }
                Err(_) => report.failures += 1,
            }
        } else {
            let idx = rng.gen_range(0, live.len() - 1);
            let block = live.swap_remove(idx);
            release(block, &mut report);
        }
    }
    for block in live.drain(..) {
        release(block, &mut report);
    }
    report
}

/// Runs the threaded canary workload against `arena`.
pub fn run_stress<S>(arena: &Arena<S>, config: &StressConfig) -> Result<StressReport, HarnessError>
where
    S: RawSource,
    Arena<S>: Sync,
{
    config.validate()?;
    let started = Instant::now();
    let threads = std::thread::scope(|s| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| s.spawn(move || churn(arena, t, config)))
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(t, h)| h.join().map_err(|_| HarnessError::WorkerPanicked(t)))
            .collect::<Result<Vec<ThreadReport>, HarnessError>>()
    })?;

    Ok(StressReport {
        config: *config,
        allocations: threads.iter().map(|t| t.allocations).sum(),
        deallocations: threads.iter().map(|t| t.deallocations).sum(),
        corruptions: threads.iter().map(|t| t.corruptions).sum(),
        failures: threads.iter().map(|t| t.failures).sum(),
        threads,
        duration_ms: started.elapsed().as_millis() as u64,
        stats: arena.stats(),
    })
}

// ---------------------------------------------------------------------------
// Exhaustion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExhaustConfig {
    /// Bytes the system source may hand out in total.
    pub budget: usize,
    /// Request size for the fill phase.
    pub size: usize,
    /// After the first failure free every n-th live block (0 skips the phase).
    pub free_every: usize,
    /// Request size for the refill phase.
    pub refill_size: usize,
    /// Times the OOM handler may add budget before it uninstalls itself.
    pub handler_grants: u32,
    /// Bytes added per handler call.
    pub grant_bytes: usize,
    /// Lifecycle records retained for the report.
    pub event_capacity: usize,
}

impl Default for ExhaustConfig {
    fn default() -> Self {
        Self {
            budget: 64 * 1024,
            size: 128,
            free_every: 4,
            refill_size: 32,
            handler_grants: 0,
            grant_bytes: 4096,
            event_capacity: 4096,
        }
    }
}

impl ExhaustConfig {
    fn validate(&self) -> Result<(), HarnessError> {
        if self.size == 0 || self.refill_size == 0 {
            return Err(HarnessError::InvalidConfig("sizes must be at least 1".into()));
        }
        if self.handler_grants > 0 && self.grant_bytes == 0 {
            return Err(HarnessError::InvalidConfig(
                "grant_bytes must be positive when the handler is enabled".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExhaustReport {
    pub config: ExhaustConfig,
    /// Allocations served before the first failure.
    pub filled: usize,
    /// The failure that ended the fill phase.
    pub fill_error: String,
    /// Blocks freed between the phases.
    pub freed: usize,
    /// Allocations served in the refill phase.
    pub refilled: usize,
    pub refill_error: Option<String>,
    pub handler_calls: u32,
    pub budget_remaining: usize,
    pub stats: ArenaStats,
    pub events: Vec<ArenaEvent>,
    pub events_dropped: u64,
}

type BudgetArena = Arena<BudgetedSource<StdHeap>>;

/// Allocates `size` blocks until the arena fails, keeping every block.
fn fill(
    arena: &BudgetArena,
    size: usize,
    live: &mut Vec<(NonNull<u8>, usize)>,
) -> (usize, AllocError) {
    let mut served = 0;
    loop {
        match arena.allocate(size) {
            Ok(ptr) => {
                live.push((ptr, size));
                served += 1;
            }
            Err(err) => return (served, err),
        }
    }
}

fn bounded_handler(
    arena: Weak<BudgetArena>,
    budget: Budget,
    calls: Arc<AtomicU32>,
    grants: u32,
    grant_bytes: usize,
) -> OomHandler {
    Arc::new(move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        budget.grant(grant_bytes);
        if n >= grants {
            // Swapping the handler slot is the one arena call a handler may make.
            if let Some(arena) = arena.upgrade() {
                arena.set_oom_handler(None);
            }
        }
    })
}

/// Runs the budgeted exhaustion scenario.
pub fn run_exhaustion(config: &ExhaustConfig) -> Result<ExhaustReport, HarnessError> {
    config.validate()?;
    let budget = Budget::new(config.budget);
    let arena = Arc::new(BudgetArena::with_config(
        BudgetedSource::new(StdHeap::new(), budget.clone()),
        ArenaConfig::new()
            .with_failure_mode(FailureMode::Error)
            .with_event_capacity(config.event_capacity),
    ));

    let calls = Arc::new(AtomicU32::new(0));
    if config.handler_grants > 0 {
        arena.set_oom_handler(Some(bounded_handler(
            Arc::downgrade(&arena),
            budget.clone(),
            Arc::clone(&calls),
            config.handler_grants,
            config.grant_bytes,
        )));
    }

    let mut live = Vec::new();
    let (filled, fill_error) = fill(&arena, config.size, &mut live);

    let mut freed = 0;
    let (mut refilled, mut refill_error) = (0, None);
    if config.free_every > 0 {
        let mut kept = Vec::with_capacity(live.len());
        for (i, (ptr, size)) in live.drain(..).enumerate() {
            if i % config.free_every == 0 {
                // SAFETY: the block came from this arena with this size.
                unsafe { arena.deallocate(ptr, size) };
                freed += 1;
            } else {
                kept.push((ptr, size));
            }
        }
        live = kept;
        let (served, err) = fill(&arena, config.refill_size, &mut live);
        refilled = served;
        refill_error = Some(err.to_string());
    }

    // Drop the handler before releasing blocks so the weak reference is gone.
    arena.set_oom_handler(None);
    for (ptr, size) in live.drain(..) {
        // SAFETY: the block came from this arena with this size.
        unsafe { arena.deallocate(ptr, size) };
    }

    Ok(ExhaustReport {
        config: *config,
        filled,
        fill_error: fill_error.to_string(),
        freed,
        refilled,
        refill_error,
        handler_calls: calls.load(Ordering::SeqCst),
        budget_remaining: budget.remaining(),
        stats: arena.stats(),
        events: arena.events(),
        events_dropped: arena.dropped_events(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodealloc_core::ArenaEventKind;

    #[test]
    fn seeds_parse_in_both_bases() {
        assert_eq!(parse_seed("42").unwrap(), 42);
        assert_eq!(parse_seed("0xDEAD_BEEF").unwrap(), 0xDEAD_BEEF);
        assert_eq!(parse_seed(" 0X10 ").unwrap(), 16);
        assert!(parse_seed("nope").is_err());
    }

    #[test]
    fn xorshift_is_deterministic() {
        let mut a = XorShift64::new(7);
        let mut b = XorShift64::new(7);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        let mut zero = XorShift64::new(0);
        assert_ne!(zero.next_u64(), 0);
    }

    #[test]
    fn small_stress_run_is_clean() {
        let arena = Arena::with_config(
            StdHeap::new(),
            ArenaConfig::new().with_failure_mode(FailureMode::Error),
        );
        let config = StressConfig {
            threads: 3,
            ops_per_thread: 5_000,
            ..StressConfig::default()
        };
        let report = run_stress(&arena, &config).unwrap();
        assert!(report.passed());
        assert_eq!(report.threads.len(), 3);
        assert_eq!(report.allocations, report.deallocations);
        assert!(report.stats.heap_bytes_acquired > 0);
    }

    #[test]
    fn stress_rejects_zero_threads() {
        let arena = Arena::with_config(StdHeap::new(), ArenaConfig::new());
        let config = StressConfig {
            threads: 0,
            ..StressConfig::default()
        };
        assert!(matches!(
            run_stress(&arena, &config),
            Err(HarnessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn exhaustion_cannibalizes_after_partial_free() {
        let report = run_exhaustion(&ExhaustConfig::default()).unwrap();
        assert!(report.filled > 0);
        assert!(report.freed > 0);
        assert!(report.refilled > 0);
        assert!(report.stats.metrics.cannibalizations > 0);
        assert!(
            report
                .events
                .iter()
                .any(|e| e.kind == ArenaEventKind::Cannibalized)
        );
        assert_eq!(report.handler_calls, 0);
        assert!(report.fill_error.starts_with("out of memory"));
    }

    #[test]
    fn bounded_handler_extends_the_fill() {
        let base = run_exhaustion(&ExhaustConfig {
            free_every: 0,
            ..ExhaustConfig::default()
        })
        .unwrap();
        let rescued = run_exhaustion(&ExhaustConfig {
            free_every: 0,
            handler_grants: 3,
            grant_bytes: 64 * 1024,
            ..ExhaustConfig::default()
        })
        .unwrap();
        assert_eq!(rescued.handler_calls, 3);
        assert!(rescued.filled > base.filled);
        assert!(rescued.stats.metrics.oom_handler_calls >= 3);
    }
}
