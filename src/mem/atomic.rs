//! Serializes an allocator behind a spin lock, establishing the
//! thread-safe allocator capability [`crate::mem::ThreadedAllocator`]
//! refills itself from.

use std::ptr::NonNull;

use crate::mem::{Allocate, FreeSized};
use crate::sync::{Guarded, RawLock, SpinLock};

/// Wraps an allocator so every `allocate`/`free`/`free_sized` call is
/// serialized by a [`SpinLock`] (or another [`RawLock`] implementation).
/// Observable order of operations on the wrapped allocator matches program
/// order per caller, since only one caller is ever inside the critical
/// section at a time.
pub struct AtomicAllocatorType<A, L = SpinLock> {
    inner: Guarded<L, A>,
}

/// An [`AtomicAllocatorType`] backed by [`SpinLock`], the common case.
pub type AtomicAllocator<A> = AtomicAllocatorType<A, SpinLock>;

impl<A, L: RawLock + Default> AtomicAllocatorType<A, L> {
    pub fn new(inner: A) -> Self {
        Self {
            inner: Guarded::new(L::default(), inner),
        }
    }
}

impl<A: Allocate, L: RawLock> Allocate for AtomicAllocatorType<A, L> {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        self.inner.lock().allocate(bytes)
    }
}

impl<A: FreeSized, L: RawLock> FreeSized for AtomicAllocatorType<A, L> {
    fn free(&self, ptr: Option<NonNull<u8>>) {
        self.inner.lock().free(ptr);
    }

    fn free_sized(&self, ptr: Option<NonNull<u8>>, bytes: usize) {
        self.inner.lock().free_sized(ptr, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{Allocator, GeneralPool};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_allocate_free_never_overlaps() {
        // N threads, M iterations each, must never see overlapping live
        // allocations through an AtomicAllocator chain.
        let pool = Arc::new(AtomicAllocator::new(GeneralPool::new(16 * 256, 16)));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut held: Vec<NonNull<u8>> = Vec::new();
                    for _ in 0..500 {
                        if let Some(p) = pool.allocate(16) {
                            held.push(p);
                        }
                        if held.len() > 4 {
                            let p = held.remove(0);
                            pool.free_sized(Some(p), 16);
                        }
                    }
                    for p in held {
                        pool.free_sized(Some(p), 16);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
    }

    #[test]
    fn serializes_a_sequence_of_allocations() {
        let pool = AtomicAllocator::new(GeneralPool::new(16 * 16, 16));
        let mut seen = HashSet::new();
        for _ in 0..16 {
            let p = pool.allocate(16).expect("table has room");
            assert!(seen.insert(p), "no overlapping live allocation under the lock");
        }
        assert!(pool.allocate(16).is_none());
    }
}
