use nodealloc_core::size_class::round_up;
use nodealloc_core::{
    ALIGN, AllocError, Arena, ArenaConfig, ArenaEventKind, Budget, BudgetedSource, FailureMode,
    MAX_BYTES, StdHeap,
};
use std::ptr::NonNull;

type TestArena = Arena<BudgetedSource<StdHeap>>;

fn arena_with(budget: &Budget) -> TestArena {
    Arena::with_config(
        BudgetedSource::new(StdHeap::new(), budget.clone()),
        ArenaConfig::new()
            .with_failure_mode(FailureMode::Error)
            .with_event_capacity(4096),
    )
}

fn unlimited() -> TestArena {
    arena_with(&Budget::new(usize::MAX))
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug)]
struct Live {
    ptr: NonNull<u8>,
    size: usize,
    tag: u8,
}

fn fill(live: &Live) {
    unsafe { live.ptr.as_ptr().write_bytes(live.tag, live.size) };
}

fn intact(live: &Live) -> bool {
    let bytes = unsafe { std::slice::from_raw_parts(live.ptr.as_ptr(), live.size) };
    bytes.iter().all(|&b| b == live.tag)
}

fn assert_disjoint(live: &[Live]) {
    let mut spans: Vec<(usize, usize)> = live
        .iter()
        .map(|l| {
            let start = l.ptr.as_ptr() as usize;
            let len = if l.size <= MAX_BYTES { round_up(l.size) } else { l.size };
            (start, start + len)
        })
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlap: {:x?} and {:x?}", pair[0], pair[1]);
    }
}

#[test]
fn lifo_reuse_for_every_pooled_size() {
    let arena = unlimited();
    for n in 1..=MAX_BYTES {
        let p = arena.allocate(n).unwrap();
        unsafe { arena.deallocate(p, n) };
        assert_eq!(arena.allocate(n).unwrap(), p, "size {n}");
        unsafe { arena.deallocate(p, n) };
    }
}

#[test]
fn requests_in_one_class_share_blocks() {
    let arena = unlimited();
    for class_top in (ALIGN..=MAX_BYTES).step_by(ALIGN) {
        let p = arena.allocate(class_top).unwrap();
        unsafe { arena.deallocate(p, class_top) };
        let smallest = class_top - ALIGN + 1;
        assert_eq!(arena.allocate(smallest).unwrap(), p);
        unsafe { arena.deallocate(p, smallest) };
    }
}

#[test]
fn every_block_is_aligned() {
    let arena = unlimited();
    for n in 1..=512 {
        let p = arena.allocate(n).unwrap();
        assert_eq!(p.as_ptr() as usize % ALIGN, 0, "size {n}");
        unsafe { arena.deallocate(p, n) };
    }
}

#[test]
fn class_boundaries_do_not_share_blocks() {
    let arena = unlimited();
    let p8 = arena.allocate(8).unwrap();
    unsafe { arena.deallocate(p8, 8) };
    assert_ne!(arena.allocate(9).unwrap(), p8);

    let p128 = arena.allocate(128).unwrap();
    unsafe { arena.deallocate(p128, 128) };
    let p129 = arena.allocate(129).unwrap();
    assert_ne!(p129, p128);
    unsafe { arena.deallocate(p129, 129) };
    assert_eq!(arena.allocate(121).unwrap(), p128);
}

#[test]
fn large_requests_draw_exactly_their_size() {
    let budget = Budget::new(1 << 20);
    let arena = arena_with(&budget);
    for n in [129usize, 200, 4096, 65_537] {
        let before = budget.remaining();
        let p = arena.allocate(n).unwrap();
        assert_eq!(budget.remaining(), before - n);
        unsafe { arena.deallocate(p, n) };
        assert_eq!(budget.remaining(), before);
    }
    assert_eq!(arena.stats().heap_bytes_acquired, 0);
}

#[test]
fn first_allocation_geometry() {
    let arena = unlimited();
    arena.allocate(8).unwrap();
    let stats = arena.stats();
    assert_eq!(stats.heap_bytes_acquired, 320);
    assert_eq!(stats.pool_bytes_available, 160);
    assert_eq!(stats.free_blocks[0], 19);
}

#[test]
fn growth_requests_follow_formula() {
    let arena = unlimited();
    let mut rng = XorShift64::new(0x5EED_0001);
    for _ in 0..5_000 {
        let n = rng.gen_range(1, MAX_BYTES);
        arena.allocate(n).unwrap();
    }
    let growths: Vec<_> = arena
        .events()
        .into_iter()
        .filter(|e| e.kind == ArenaEventKind::ChunkGrowth)
        .collect();
    assert!(growths.len() > 3);
    for e in &growths {
        let bytes = e.bytes.unwrap();
        let size = e.size.unwrap();
        let needed = size * arena.chunk_objects();
        let heap_before = e.heap_bytes - bytes;
        assert!(bytes >= 2 * needed);
        assert_eq!(bytes, 2 * needed + round_up(heap_before >> 4));
    }
    let stats = arena.stats();
    assert_eq!(stats.regions, growths.len());
    assert_eq!(stats.heap_bytes_acquired, growths.last().unwrap().heap_bytes);
}

#[test]
fn heap_bytes_never_decrease() {
    let arena = unlimited();
    let mut rng = XorShift64::new(42);
    let mut live = Vec::new();
    let mut last = 0;
    for _ in 0..20_000 {
        if live.is_empty() || rng.gen_range(0, 2) > 0 {
            let n = rng.gen_range(1, MAX_BYTES);
            live.push((arena.allocate(n).unwrap(), n));
        } else {
            let idx = rng.gen_range(0, live.len() - 1);
            let (p, n) = live.swap_remove(idx);
            unsafe { arena.deallocate(p, n) };
        }
        let heap = arena.stats().heap_bytes_acquired;
        assert!(heap >= last);
        last = heap;
    }
}

#[test]
fn live_blocks_never_overlap_and_keep_contents() {
    let arena = unlimited();
    let mut rng = XorShift64::new(0xDEAD_BEEF);
    let mut live: Vec<Live> = Vec::new();
    for round in 0..6u8 {
        for k in 0..400 {
            let size = rng.gen_range(1, 300);
            let rec = Live {
                ptr: arena.allocate(size).unwrap(),
                size,
                tag: round.wrapping_mul(31).wrapping_add(k as u8) | 1,
            };
            fill(&rec);
            live.push(rec);
        }
        assert_disjoint(&live);
        assert!(live.iter().all(intact));

        // free about half, in random order
        for _ in 0..live.len() / 2 {
            let idx = rng.gen_range(0, live.len() - 1);
            let rec = live.swap_remove(idx);
            assert!(intact(&rec));
            unsafe { arena.deallocate(rec.ptr, rec.size) };
        }
        assert!(live.iter().all(intact));
    }
    for rec in live.drain(..) {
        unsafe { arena.deallocate(rec.ptr, rec.size) };
    }
}

#[test]
fn reallocate_keeps_the_shared_prefix() {
    let arena = unlimited();
    let mut rng = XorShift64::new(7);
    let mut size = 1;
    let mut ptr = arena.allocate(size).unwrap();
    unsafe { ptr.as_ptr().write(0xA5) };
    for _ in 0..200 {
        let next = rng.gen_range(1, 400);
        ptr = unsafe { arena.reallocate(ptr, size, next) }.unwrap();
        assert_eq!(unsafe { ptr.as_ptr().read() }, 0xA5);
        size = next;
    }
    unsafe { arena.deallocate(ptr, size) };
}

#[test]
fn free_bytes_tracks_list_contents() {
    let arena = unlimited();
    let p = arena.allocate(40).unwrap();
    let stats = arena.stats();
    assert_eq!(stats.free_blocks[4], 19);
    assert_eq!(stats.free_bytes, 19 * 40);
    unsafe { arena.deallocate(p, 40) };
    assert_eq!(arena.stats().free_bytes, 20 * 40);
}

#[test]
fn chunk_objects_is_configurable() {
    let arena: TestArena = Arena::with_config(
        BudgetedSource::new(StdHeap::new(), Budget::new(usize::MAX)),
        ArenaConfig::new()
            .with_chunk_objects(4)
            .with_failure_mode(FailureMode::Error),
    );
    arena.allocate(16).unwrap();
    let stats = arena.stats();
    assert_eq!(stats.heap_bytes_acquired, 2 * 4 * 16);
    assert_eq!(stats.free_blocks[1], 3);
}

#[test]
fn failure_is_reported_not_panicked() {
    let arena = arena_with(&Budget::new(0));
    assert_eq!(
        arena.allocate(8),
        Err(AllocError::OutOfMemory { requested: 320 })
    );
}
