//! Synchronization primitives: spin locks, user-space futex-style mutexes, a
//! shared (reader/writer) mutex, and a fair ordered RW lock built from an
//! intrusive queue of lock nodes.
//!
//! All of the exclusive primitives in this module ([`SpinLock`], [`Futex`],
//! [`SystemFutex`]) share the same raw [`RawLock`] contract: `lock`,
//! `try_lock`, `unlock`, guarding nothing themselves. [`SharedMutexType`]
//! and [`FairRwLockType`] are generic over this trait so a caller can pick
//! the inner exclusive primitive that best matches their contention
//! profile, the same way the source library parameterizes its shared mutex
//! and fair RW lock over a `MutexType`.

mod fair_rwlock;
mod futex;
mod shared_mutex;
mod spinlock;

pub use fair_rwlock::{FairRwLock, FairRwLockType, FairRwReadGuard, FairRwWriteGuard};
pub use futex::{Futex, PauseBudget, SystemFutex};
pub use shared_mutex::{SharedFutex, SharedMutexType, SharedReadGuard, SharedSpinLock, SharedWriteGuard};
pub use spinlock::SpinLock;

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

/// The raw exclusive-lock contract shared by [`SpinLock`], [`Futex`], and
/// [`SystemFutex`]. Implementors guard no data; they are pure signaling
/// primitives, matching the source library's `lock()`/`try_lock()`/
/// `unlock()` mutex-like types used as building blocks for the higher-level
/// shared mutex and fair RW lock.
pub trait RawLock {
    /// Block until the lock is acquired.
    fn lock(&self);

    /// Attempt to acquire the lock without blocking.
    fn try_lock(&self) -> bool;

    /// Release a lock previously acquired by `lock` or a successful
    /// `try_lock` on the same thread. Undefined behavior (debug-asserted)
    /// if the lock is not held.
    fn unlock(&self);
}

/// Pairs a [`RawLock`] with a value it protects, the way [`std::sync::Mutex`]
/// pairs `sys::Mutex` with `UnsafeCell<T>`. Used internally wherever this
/// crate needs to guard arbitrary data behind one of its raw primitives
/// (e.g. the atomic allocator, a worker's task buffers).
pub struct Guarded<L, T> {
    lock: L,
    value: UnsafeCell<T>,
}

unsafe impl<L: Send, T: Send> Send for Guarded<L, T> {}
unsafe impl<L: Send + Sync, T: Send> Sync for Guarded<L, T> {}

pub struct GuardedAccess<'a, L: RawLock, T> {
    guarded: &'a Guarded<L, T>,
}

impl<L: RawLock, T> Guarded<L, T> {
    pub const fn new(lock: L, value: T) -> Self {
        Self {
            lock,
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> GuardedAccess<'_, L, T> {
        self.lock.lock();
        GuardedAccess { guarded: self }
    }

    pub fn try_lock(&self) -> Option<GuardedAccess<'_, L, T>> {
        self.lock.try_lock().then_some(GuardedAccess { guarded: self })
    }

    /// Access the inner lock directly, e.g. to use it as a `MutexType` for
    /// a [`FairRwLockType`] node.
    pub fn raw_lock(&self) -> &L {
        &self.lock
    }
}

impl<L: RawLock, T> Deref for GuardedAccess<'_, L, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.guarded.value.get() }
    }
}

impl<L: RawLock, T> DerefMut for GuardedAccess<'_, L, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.guarded.value.get() }
    }
}

impl<L: RawLock, T> Drop for GuardedAccess<'_, L, T> {
    fn drop(&mut self) {
        self.guarded.lock.unlock();
    }
}
