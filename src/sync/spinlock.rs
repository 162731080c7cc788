//! A CPU-yielding exclusive lock.
//!
//! `SpinLock` never leaves user space: it loops on a test-and-set atomic and
//! hints the CPU to pause on every iteration. It is cache-line aligned and
//! padded so that two independent spin locks never share a cache line and
//! thrash each other under contention.
//!
//! Unlike [`std::sync::Mutex`], `SpinLock` guards no data of its own — it
//! implements [`RawLock`] directly, the same raw lock/try_lock/unlock
//! contract the futex, shared mutex, and fair RW lock queue nodes are built
//! from. Use [`crate::sync::Guarded`] to pair a `SpinLock` with a value.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::CachePadded;

use super::RawLock;

/// A spinning mutual-exclusion primitive. Not reentrant: locking twice from
/// the same thread deadlocks. Neither `Copy`, `Clone`, nor safely movable
/// once shared.
pub struct SpinLock {
    locked: CachePadded<AtomicBool>,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: CachePadded::new(AtomicBool::new(false)),
        }
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawLock for SpinLock {
    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        debug_assert!(self.locked.load(Ordering::Relaxed), "unlock without lock");
        self.locked.store(false, Ordering::Release);
    }
}

static_assertions::assert_eq_size!(CachePadded<AtomicBool>, [u8; 64]);
static_assertions::const_assert_eq!(std::mem::align_of::<SpinLock>(), 64);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new();
        lock.lock();
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn concurrent_increments_are_exact() {
        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        lock.lock();
                        counter.fetch_add(1, Ordering::Relaxed);
                        lock.unlock();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 80_000);
    }
}
