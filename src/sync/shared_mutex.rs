//! A reader/writer mutex packed into a single atomic counter.
//!
//! `SharedMutexType` has no FIFO ordering guarantee between readers and
//! writers — a steady stream of readers can starve a waiting writer. Use
//! [`crate::sync::FairRwLockType`] when strict arrival-order fairness
//! matters; use this when the simpler, cheaper counter suffices.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{Futex, RawLock, SpinLock};

/// Set on the top bit of the counter while a writer holds the lock.
const WRITER_BIT: u64 = 1 << 63;
/// The remaining bits count concurrently active readers.
const READERS_MASK: u64 = WRITER_BIT - 1;

/// A reader/writer mutex generic over the raw exclusive primitive used to
/// serialize the handful of instructions that update the shared counter.
/// The counter itself carries the actual reader/writer state; the inner
/// lock only protects the read-modify-write sequence against itself.
pub struct SharedMutexType<L> {
    state: AtomicU64,
    gate: L,
}

/// A [`SharedMutexType`] backed by [`SpinLock`].
pub type SharedSpinLock = SharedMutexType<SpinLock>;
/// A [`SharedMutexType`] backed by [`Futex`].
pub type SharedFutex = SharedMutexType<Futex>;

impl<L: RawLock + Default> SharedMutexType<L> {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            gate: L::default(),
        }
    }
}

impl<L: RawLock + Default> Default for SharedMutexType<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RawLock> SharedMutexType<L> {
    pub fn lock(&self) -> SharedWriteGuard<'_, L> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            std::thread::yield_now();
        }
    }

    pub fn try_lock(&self) -> Option<SharedWriteGuard<'_, L>> {
        self.gate.lock();
        let acquired = self
            .state
            .compare_exchange(0, WRITER_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        self.gate.unlock();

        acquired.then_some(SharedWriteGuard { mutex: self })
    }

    /// Lock-free fast path: `fetch_add(1)` first, then check whether a
    /// writer was already in. If so, back off — undo the increment and
    /// spin until the writer bit clears — and retry. Readers never touch
    /// `gate`; only the writer CAS in [`Self::try_lock`] does.
    pub fn lock_shared(&self) -> SharedReadGuard<'_, L> {
        loop {
            let previous = self.state.fetch_add(1, Ordering::Acquire);
            if previous & WRITER_BIT == 0 {
                return SharedReadGuard { mutex: self };
            }
            self.state.fetch_sub(1, Ordering::Relaxed);
            while self.state.load(Ordering::Relaxed) & WRITER_BIT != 0 {
                std::thread::yield_now();
            }
        }
    }

    pub fn try_lock_shared(&self) -> Option<SharedReadGuard<'_, L>> {
        let previous = self.state.fetch_add(1, Ordering::Acquire);
        if previous & WRITER_BIT != 0 {
            self.state.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        Some(SharedReadGuard { mutex: self })
    }

    fn unlock(&self) {
        let previous = self.state.fetch_and(!WRITER_BIT, Ordering::Release);
        debug_assert_ne!(previous & WRITER_BIT, 0, "unlock of a shared mutex not held for write");
    }

    fn unlock_shared(&self) {
        let previous = self.state.fetch_sub(1, Ordering::Release);
        debug_assert_ne!(previous & READERS_MASK, 0, "unlock_shared with no reader registered");
    }
}

/// RAII write (exclusive) guard for a [`SharedMutexType`].
pub struct SharedWriteGuard<'a, L: RawLock> {
    mutex: &'a SharedMutexType<L>,
}

impl<L: RawLock> Drop for SharedWriteGuard<'_, L> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// RAII read (shared) guard for a [`SharedMutexType`].
pub struct SharedReadGuard<'a, L: RawLock> {
    mutex: &'a SharedMutexType<L>,
}

impl<L: RawLock> Drop for SharedReadGuard<'_, L> {
    fn drop(&mut self) {
        self.mutex.unlock_shared();
    }
}
