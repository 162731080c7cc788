//! A user-space mutex that only pays for a kernel wait when it has to.
//!
//! [`Futex`] performs a bounded, doubling-backoff compare-and-swap spin and
//! then falls back to an unbounded yield-and-retry loop — it never leaves
//! user space. [`SystemFutex`] has the same bounded spin but, once the
//! budget is exhausted, blocks via the platform's native wait primitive
//! (the Linux futex syscall, or a Windows slim RW lock) instead of
//! busy-yielding forever.

use std::sync::atomic::{AtomicU32, Ordering};

use super::RawLock;

/// The number of CPU-pause hints a [`Futex`] spends, per doubling round,
/// before giving up on pure spinning. Values are powers of two; `Max` is
/// the implementation ceiling, matching the source library's clamp of an
/// oversized request down to its largest supported budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PauseBudget {
    P1 = 1,
    P2 = 2,
    P4 = 4,
    P8 = 8,
    P16 = 16,
    P32 = 32,
    P64 = 64,
    Max = 128,
}

impl PauseBudget {
    const fn clamp(self) -> u32 {
        let v = self as u32;
        if v > PauseBudget::Max as u32 {
            PauseBudget::Max as u32
        } else {
            v
        }
    }
}

impl Default for PauseBudget {
    fn default() -> Self {
        PauseBudget::P16
    }
}

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// A bounded-spin-then-yield mutex, entirely in user space.
pub struct Futex {
    state: AtomicU32,
    max_pauses: u32,
}

impl Futex {
    pub const fn new(budget: PauseBudget) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            max_pauses: budget.clamp(),
        }
    }

    pub fn pause_count(&self) -> u32 {
        self.max_pauses
    }
}

impl Default for Futex {
    fn default() -> Self {
        Self::new(PauseBudget::default())
    }
}

impl RawLock for Futex {
    fn lock(&self) {
        let mut current_pauses: u32 = 1;
        loop {
            if self
                .state
                .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            for _ in 0..current_pauses {
                std::thread::yield_now();
            }
            current_pauses <<= 1;

            if current_pauses > self.max_pauses {
                break;
            }
        }

        loop {
            if self
                .state
                .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            for _ in 0..self.max_pauses {
                std::hint::spin_loop();
                std::thread::yield_now();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        debug_assert_eq!(self.state.load(Ordering::Relaxed), LOCKED, "unlock without lock");
        self.state.store(UNLOCKED, Ordering::Release);
    }
}

/// Like [`Futex`], but falls back to a platform wait (rather than an
/// unbounded yield loop) once the user-space pause budget is spent.
pub struct SystemFutex {
    inner: SystemFutexImpl,
    max_pauses: u32,
}

impl SystemFutex {
    pub fn new(budget: PauseBudget) -> Self {
        Self {
            inner: SystemFutexImpl::new(),
            max_pauses: budget.clamp(),
        }
    }

    pub fn pause_count(&self) -> u32 {
        self.max_pauses
    }
}

impl Default for SystemFutex {
    fn default() -> Self {
        Self::new(PauseBudget::default())
    }
}

impl RawLock for SystemFutex {
    fn lock(&self) {
        let mut current_pauses: u32 = 1;
        loop {
            if self.inner.try_acquire() {
                return;
            }

            for _ in 0..current_pauses {
                std::thread::yield_now();
            }

            if current_pauses > self.max_pauses {
                break;
            }
            current_pauses <<= 1;
        }

        self.inner.wait_and_acquire();
    }

    fn try_lock(&self) -> bool {
        self.inner.try_acquire()
    }

    fn unlock(&self) {
        self.inner.release();
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::sync::atomic::{AtomicU32, Ordering};

    const UNLOCKED: u32 = 0;
    const LOCKED: u32 = 1;
    const CONTENDED: u32 = 2;

    pub struct SystemFutexImpl {
        state: AtomicU32,
    }

    impl SystemFutexImpl {
        pub fn new() -> Self {
            Self {
                state: AtomicU32::new(UNLOCKED),
            }
        }

        pub fn try_acquire(&self) -> bool {
            self.state
                .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        }

        pub fn wait_and_acquire(&self) {
            loop {
                if self
                    .state
                    .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }

                // Announce contention so the unlocking thread knows to wake us.
                if self.state.swap(CONTENDED, Ordering::Acquire) == UNLOCKED {
                    return;
                }

                futex_wait(&self.state, CONTENDED);
            }
        }

        pub fn release(&self) {
            if self.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
                futex_wake_one(&self.state);
            }
        }
    }

    fn futex_wait(word: &AtomicU32, expected: u32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32 as *const u32,
                libc::FUTEX_WAIT,
                expected,
                std::ptr::null::<libc::timespec>(),
            );
        }
    }

    fn futex_wake_one(word: &AtomicU32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32 as *const u32,
                libc::FUTEX_WAKE,
                1i32,
            );
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::cell::UnsafeCell;
    use windows_sys::Win32::System::Threading::{
        AcquireSRWLockExclusive, ReleaseSRWLockExclusive, TryAcquireSRWLockExclusive,
        RTL_SRWLOCK_INIT, SRWLOCK,
    };

    pub struct SystemFutexImpl {
        lock: UnsafeCell<SRWLOCK>,
    }

    unsafe impl Send for SystemFutexImpl {}
    unsafe impl Sync for SystemFutexImpl {}

    impl SystemFutexImpl {
        pub fn new() -> Self {
            Self {
                lock: UnsafeCell::new(RTL_SRWLOCK_INIT),
            }
        }

        pub fn try_acquire(&self) -> bool {
            unsafe { TryAcquireSRWLockExclusive(self.lock.get()) != 0 }
        }

        pub fn wait_and_acquire(&self) {
            unsafe { AcquireSRWLockExclusive(self.lock.get()) }
        }

        pub fn release(&self) {
            unsafe { ReleaseSRWLockExclusive(self.lock.get()) }
        }
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
mod imp {
    use std::sync::atomic::{AtomicU32, Ordering};

    const UNLOCKED: u32 = 0;
    const LOCKED: u32 = 1;

    /// No native futex/SRWLOCK wait is available on this platform; fall
    /// back to an unbounded yield loop, same as [`super::Futex`].
    pub struct SystemFutexImpl {
        state: AtomicU32,
    }

    impl SystemFutexImpl {
        pub fn new() -> Self {
            Self {
                state: AtomicU32::new(UNLOCKED),
            }
        }

        pub fn try_acquire(&self) -> bool {
            self.state
                .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        }

        pub fn wait_and_acquire(&self) {
            loop {
                if self.try_acquire() {
                    return;
                }
                std::thread::yield_now();
            }
        }

        pub fn release(&self) {
            self.state.store(UNLOCKED, Ordering::Release);
        }
    }
}

use imp::SystemFutexImpl;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn futex_try_lock_respects_state() {
        let f = Futex::default();
        assert!(f.try_lock());
        assert!(!f.try_lock());
        f.unlock();
        assert!(f.try_lock());
    }

    #[test]
    fn futex_clamps_oversized_budget() {
        let f = Futex::new(PauseBudget::Max);
        assert_eq!(f.pause_count(), PauseBudget::Max as u32);
    }

    #[test]
    fn futex_concurrent_exclusion() {
        let f = Arc::new(Futex::default());
        let counter = Arc::new(AtomicU64::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let f = Arc::clone(&f);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        f.lock();
                        counter.fetch_add(1, Ordering::Relaxed);
                        f.unlock();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 16_000);
    }

    #[test]
    fn system_futex_concurrent_exclusion() {
        let f = Arc::new(SystemFutex::default());
        let counter = Arc::new(AtomicU64::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let f = Arc::clone(&f);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        f.lock();
                        counter.fetch_add(1, Ordering::Relaxed);
                        f.unlock();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 16_000);
    }
}
