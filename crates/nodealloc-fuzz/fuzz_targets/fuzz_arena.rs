#![no_main]
use libfuzzer_sys::fuzz_target;
use nodealloc_core::{Arena, ArenaConfig, Budget, BudgetedSource, FailureMode, StdHeap};
use std::ptr::NonNull;

struct Live {
    ptr: NonNull<u8>,
    size: usize,
    tag: u8,
}

fn stamp(live: &Live) {
    unsafe { live.ptr.as_ptr().write_bytes(live.tag, live.size) };
}

fn intact(live: &Live, len: usize) -> bool {
    let bytes = unsafe { std::slice::from_raw_parts(live.ptr.as_ptr(), len) };
    bytes.iter().all(|&b| b == live.tag)
}

fuzz_target!(|data: &[u8]| {
    // Operations are 4-byte records: op, size lo, size hi, tag.
    if data.len() < 4 {
        return;
    }

    let budget = Budget::new(64 * 1024);
    let arena = Arena::with_config(
        BudgetedSource::new(StdHeap::new(), budget),
        ArenaConfig::new()
            .with_failure_mode(FailureMode::Error)
            .with_event_capacity(64),
    );
    let mut live: Vec<Live> = Vec::new();

    for chunk in data.chunks_exact(4) {
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]])) % 512;
        let tag = chunk[3];
        match chunk[0] % 4 {
            0 => {
                if let Ok(ptr) = arena.allocate(size) {
                    let entry = Live { ptr, size, tag };
                    stamp(&entry);
                    live.push(entry);
                }
            }
            1 => {
                if live.is_empty() {
                    continue;
                }
                let entry = live.swap_remove(usize::from(tag) % live.len());
                assert!(intact(&entry, entry.size), "canary clobbered");
                unsafe { arena.deallocate(entry.ptr, entry.size) };
            }
            2 => {
                if live.is_empty() {
                    continue;
                }
                let idx = usize::from(tag) % live.len();
                let old = &live[idx];
                if let Ok(ptr) = unsafe { arena.reallocate(old.ptr, old.size, size) } {
                    let kept = old.size.min(size);
                    let moved = Live { ptr, size, tag: old.tag };
                    assert!(intact(&moved, kept), "reallocate lost the prefix");
                    stamp(&moved);
                    live[idx] = moved;
                }
            }
            _ => {
                let stats = arena.stats();
                assert!(stats.pool_bytes_available + stats.free_bytes <= stats.heap_bytes_acquired);
                assert_eq!(stats.free_bytes % 8, 0);
            }
        }
    }

    for entry in live {
        assert!(intact(&entry, entry.size), "canary clobbered");
        unsafe { arena.deallocate(entry.ptr, entry.size) };
    }
});
