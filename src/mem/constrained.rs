//! A byte-budgeted front over any [`Allocator`].
//!
//! `ConstrainedAllocator` tracks a running total of bytes currently live
//! and refuses any request that would push that total past a configured
//! `max`. Because the budget accounting depends on knowing exactly how
//! many bytes were freed, it can only support sized frees — an unsized
//! `free` would leave `used` wrong forever, so it is treated as an
//! invariant violation rather than silently mis-accounted.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{fatal, FatalKind, RecoverableError};
use crate::mem::{Allocate, FreeSized};

/// Wraps an underlying allocator with a byte budget. `max` may be fixed at
/// construction time (a runtime value) the same way the source library
/// exposes both a compile-time-constant and a runtime-configured budget —
/// here a single runtime field covers both, since a `const` budget is just
/// a runtime one the caller never changes.
pub struct ConstrainedAllocator<A> {
    inner: A,
    max: usize,
    used: AtomicUsize,
}

impl<A> ConstrainedAllocator<A> {
    pub const fn new(inner: A, max: usize) -> Self {
        Self {
            inner,
            max,
            used: AtomicUsize::new(0),
        }
    }

    /// Bytes currently accounted as live under this allocator.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn budget(&self) -> usize {
        self.max
    }
}

impl<A: Allocate> Allocate for ConstrainedAllocator<A> {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes == 0 {
            return None;
        }
        loop {
            let current = self.used.load(Ordering::Relaxed);
            let Some(next) = current.checked_add(bytes) else {
                log::warn!("{}: {current} + {bytes}", RecoverableError::BudgetExceeded);
                return None;
            };
            if next > self.max {
                log::warn!(
                    "{}: {current} + {bytes} > {}",
                    RecoverableError::BudgetExceeded,
                    self.max
                );
                return None;
            }
            if self
                .used
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        let ptr = self.inner.allocate(bytes);
        if ptr.is_none() {
            self.used.fetch_sub(bytes, Ordering::Relaxed);
        }
        ptr
    }
}

impl<A: FreeSized> FreeSized for ConstrainedAllocator<A> {
    /// Forbidden: the budget cannot be decremented without knowing the
    /// size being released. Calling this is an invariant violation, not a
    /// recoverable failure, because every prior accounting of `used` for
    /// this allocation would otherwise be permanently wrong.
    fn free(&self, ptr: Option<NonNull<u8>>) {
        if ptr.is_some() {
            fatal(
                FatalKind::UnsupportedUnsizedFree,
                "ConstrainedAllocator requires a sized free to keep its budget accurate",
            );
        }
    }

    fn free_sized(&self, ptr: Option<NonNull<u8>>, bytes: usize) {
        if let Some(p) = ptr {
            self.inner.free_sized(Some(p), bytes);
            self.used.fetch_sub(bytes, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MallocSource;
    use crate::mem::Allocator;

    struct MallocAllocator(MallocSource);

    impl Allocate for MallocAllocator {
        fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
            crate::mem::MemorySource::allocate(&self.0, bytes)
        }
    }

    impl FreeSized for MallocAllocator {
        fn free(&self, ptr: Option<NonNull<u8>>) {
            if let Some(p) = ptr {
                crate::mem::MemorySource::free(&self.0, p);
            }
        }

        fn free_sized(&self, ptr: Option<NonNull<u8>>, bytes: usize) {
            if let Some(p) = ptr {
                crate::mem::MemorySource::free_sized(&self.0, p, bytes);
            }
        }
    }

    #[test]
    fn budget_exhaustion_and_release_scenario() {
        // Exhaust the budget, release half of it, then confirm it is usable again.
        let a = ConstrainedAllocator::new(MallocAllocator(MallocSource::new()), 128);
        let p1 = a.allocate(64).expect("first 64 fits budget");
        let p2 = a.allocate(64).expect("second 64 exactly fills budget");
        assert!(a.allocate(1).is_none(), "budget exhausted");
        a.free_sized(Some(p2), 64);
        assert_eq!(a.used(), 64);
        let p3 = a.allocate(64).expect("freed budget is usable again");
        a.free_sized(Some(p1), 64);
        a.free_sized(Some(p3), 64);
        assert_eq!(a.used(), 0);
    }

    #[test]
    fn zero_byte_allocate_is_none_and_does_not_touch_budget() {
        let a = ConstrainedAllocator::new(MallocAllocator(MallocSource::new()), 16);
        assert!(a.allocate(0).is_none());
        assert_eq!(a.used(), 0);
    }

    #[test]
    #[should_panic(expected = "unsized free")]
    fn unsized_free_is_fatal() {
        let a = ConstrainedAllocator::new(MallocAllocator(MallocSource::new()), 16);
        let p = a.allocate(8).unwrap();
        a.free(Some(p));
    }

    #[test]
    fn concurrent_allocations_never_exceed_budget() {
        use std::sync::Arc;
        use std::thread;

        let a = Arc::new(ConstrainedAllocator::new(MallocAllocator(MallocSource::new()), 8 * 64));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let a = Arc::clone(&a);
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for _ in 0..100 {
                        if let Some(p) = a.allocate(64) {
                            held.push(p);
                        }
                        if held.len() > 4 {
                            let p = held.remove(0);
                            a.free_sized(Some(p), 64);
                        }
                    }
                    for p in held {
                        a.free_sized(Some(p), 64);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(a.used(), 0);
        assert!(a.used() <= a.budget());
    }
}
