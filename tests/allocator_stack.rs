//! Integration-level multi-thread invariants over the full allocator
//! stack, mirroring the unit-level versions of the same properties but
//! compiled and run as a separate crate, the way the source library
//! exercises its scheduler under `tests/scheduler.rs`.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;

use keelcore::mem::{AtomicAllocator, Allocator, BlockAllocator, ConstrainedAllocator, GeneralPool};

#[test]
fn concurrent_allocate_free_through_the_full_stack_never_overlaps() {
    // ConstrainedAllocator -> AtomicAllocator -> GeneralPool, eight
    // threads hammering allocate/free_sized concurrently; no live
    // allocation is ever handed out twice.
    let pool = ConstrainedAllocator::new(AtomicAllocator::new(GeneralPool::new(32 * 512, 32)), 32 * 400);
    let stack = Arc::new(pool);

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                let mut held: Vec<NonNull<u8>> = Vec::new();
                for _ in 0..300 {
                    if let Some(p) = stack.allocate(24) {
                        held.push(p);
                    }
                    if held.len() > 6 {
                        let p = held.remove(0);
                        stack.free_sized(Some(p), 24);
                    }
                }
                for p in held {
                    stack.free_sized(Some(p), 24);
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(stack.used(), 0, "every allocation was eventually freed");
}

#[test]
fn block_allocator_over_atomic_pool_rounds_and_serializes() {
    let pool: BlockAllocator<_, 16> = BlockAllocator::new(AtomicAllocator::new(GeneralPool::new(16 * 64, 16)));
    let stack = Arc::new(pool);

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                let mut seen = HashSet::new();
                let mut held = Vec::new();
                for _ in 0..50 {
                    if let Some(p) = stack.allocate(9) {
                        assert!(seen.insert(p), "no duplicate pointer handed out concurrently");
                        held.push(p);
                    }
                }
                for p in held {
                    stack.free_sized(Some(p), 9);
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }
}
