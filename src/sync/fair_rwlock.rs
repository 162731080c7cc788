//! A strictly fair, FIFO-ordered reader/writer lock.
//!
//! Unlike [`crate::sync::SharedMutexType`], `FairRwLockType` never lets a
//! later arrival run ahead of an earlier one: each call to `lock`/
//! `lock_shared` enqueues a node onto the tail of an intrusive queue, and a
//! node only starts running once every node ahead of it has finished. A
//! contiguous run of reader nodes at the head of the queue runs
//! concurrently; a writer node always runs alone.
//!
//! Queue nodes are heap-allocated rather than borrowed from the caller's
//! stack frame: an intrusive list of caller-stack nodes needs the node to
//! outlive the call that created it by exactly the RAII guard's lifetime,
//! which Rust cannot express without pinning the caller's frame. A small
//! boxed node per waiter is the idiomatic trade for the same FIFO
//! admission order. Because this lock has no cancellation/timeout path,
//! the queue only needs a forward (`next`) link — removal always happens
//! from the head.

use std::ptr;

use super::{Guarded, RawLock, SpinLock};

struct Node<L> {
    shared: bool,
    gate: L,
    next: *mut Node<L>,
}

struct QueueState<L> {
    head: *mut Node<L>,
    tail: *mut Node<L>,
    running_exclusive: bool,
    running_count: usize,
    last_running_tail: *mut Node<L>,
}

unsafe impl<L: Send> Send for QueueState<L> {}

impl<L> QueueState<L> {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            running_exclusive: false,
            running_count: 0,
            last_running_tail: ptr::null_mut(),
        }
    }
}

/// A fair reader/writer lock, generic over the raw primitive used to park
/// each queued waiter.
pub struct FairRwLockType<L> {
    queue: Guarded<SpinLock, QueueState<L>>,
}

/// A [`FairRwLockType`] backed by [`SpinLock`] queue nodes.
pub type FairRwLock = FairRwLockType<SpinLock>;

impl<L: RawLock + Default> FairRwLockType<L> {
    pub fn new() -> Self {
        Self {
            queue: Guarded::new(SpinLock::new(), QueueState::new()),
        }
    }

    /// Append a node to the tail; always succeeds, may have to wait.
    /// Returns the node and whether it is already part of a running run.
    fn enqueue(&self, shared: bool) -> (*mut Node<L>, bool) {
        let mut q = self.queue.lock();
        let node = Box::into_raw(Box::new(Node {
            shared,
            gate: L::default(),
            next: ptr::null_mut(),
        }));
        // Pre-acquire: the node starts "not ready"; a later `.lock()` on
        // this same gate blocks until some other thread calls `.unlock()`.
        unsafe {
            (*node).gate.try_lock();
        }

        let old_tail = q.tail;
        if !old_tail.is_null() {
            unsafe {
                (*old_tail).next = node;
            }
        } else {
            q.head = node;
        }
        q.tail = node;

        let run_immediately = if old_tail.is_null() {
            q.running_exclusive = !shared;
            q.running_count = 1;
            q.last_running_tail = node;
            true
        } else if shared && !q.running_exclusive && q.last_running_tail == old_tail {
            q.running_count += 1;
            q.last_running_tail = node;
            true
        } else {
            false
        };

        (node, run_immediately)
    }

    /// Try to join a run or start a fresh one without ever queuing behind
    /// a waiter. The whole decision and mutation happens under one lock
    /// hold, so there is no window where another thread could append
    /// after us and strand a rollback.
    fn try_enqueue(&self, shared: bool) -> Option<*mut Node<L>> {
        let mut q = self.queue.lock();
        let old_tail = q.tail;
        let can_run = old_tail.is_null() || (shared && !q.running_exclusive && q.last_running_tail == old_tail);
        if !can_run {
            return None;
        }

        let node = Box::into_raw(Box::new(Node {
            shared,
            gate: L::default(),
            next: ptr::null_mut(),
        }));
        unsafe {
            (*node).gate.try_lock();
        }

        if !old_tail.is_null() {
            unsafe {
                (*old_tail).next = node;
            }
            q.running_count += 1;
        } else {
            q.head = node;
            q.running_exclusive = !shared;
            q.running_count = 1;
        }
        q.tail = node;
        q.last_running_tail = node;

        Some(node)
    }

    /// Called when the waiter owning `node` is done. Tears down the run
    /// once every member has finished and wakes the next run, if any.
    fn finish(&self, node: *mut Node<L>) {
        let mut q = self.queue.lock();
        let _ = node;
        q.running_count -= 1;
        if q.running_count != 0 {
            return;
        }

        let last = q.last_running_tail;
        let next_head = unsafe { (*last).next };

        let mut cur = q.head;
        loop {
            let next = unsafe { (*cur).next };
            unsafe {
                drop(Box::from_raw(cur));
            }
            if cur == last {
                break;
            }
            cur = next;
        }

        q.head = next_head;
        if q.head.is_null() {
            q.tail = ptr::null_mut();
            q.last_running_tail = ptr::null_mut();
            q.running_exclusive = false;
            q.running_count = 0;
            return;
        }

        let head_is_shared = unsafe { (*q.head).shared };
        q.running_exclusive = !head_is_shared;

        if !head_is_shared {
            q.running_count = 1;
            q.last_running_tail = q.head;
            unsafe {
                (*q.head).gate.unlock();
            }
            return;
        }

        let mut count = 0usize;
        let mut cur = q.head;
        loop {
            count += 1;
            unsafe {
                (*cur).gate.unlock();
            }
            let next = unsafe { (*cur).next };
            if next.is_null() || !unsafe { (*next).shared } {
                q.last_running_tail = cur;
                break;
            }
            cur = next;
        }
        q.running_count = count;
    }

    pub fn lock(&self) -> FairRwWriteGuard<'_, L> {
        let (node, run_immediately) = self.enqueue(false);
        if run_immediately {
            unsafe {
                (*node).gate.unlock();
            }
        }
        unsafe {
            (*node).gate.lock();
        }
        FairRwWriteGuard { lock: self, node }
    }

    pub fn try_lock(&self) -> Option<FairRwWriteGuard<'_, L>> {
        self.try_enqueue(false).map(|node| {
            unsafe {
                (*node).gate.unlock();
                (*node).gate.lock();
            }
            FairRwWriteGuard { lock: self, node }
        })
    }

    pub fn lock_shared(&self) -> FairRwReadGuard<'_, L> {
        let (node, run_immediately) = self.enqueue(true);
        if run_immediately {
            unsafe {
                (*node).gate.unlock();
            }
        }
        unsafe {
            (*node).gate.lock();
        }
        FairRwReadGuard { lock: self, node }
    }

    pub fn try_lock_shared(&self) -> Option<FairRwReadGuard<'_, L>> {
        self.try_enqueue(true).map(|node| {
            unsafe {
                (*node).gate.unlock();
                (*node).gate.lock();
            }
            FairRwReadGuard { lock: self, node }
        })
    }
}

impl<L: RawLock + Default> Default for FairRwLockType<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII exclusive guard for a [`FairRwLockType`].
pub struct FairRwWriteGuard<'a, L: RawLock> {
    lock: &'a FairRwLockType<L>,
    node: *mut Node<L>,
}

unsafe impl<L: RawLock + Send> Send for FairRwWriteGuard<'_, L> {}

impl<L: RawLock> Drop for FairRwWriteGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.finish(self.node);
    }
}

/// RAII shared guard for a [`FairRwLockType`].
pub struct FairRwReadGuard<'a, L: RawLock> {
    lock: &'a FairRwLockType<L>,
    node: *mut Node<L>,
}

unsafe impl<L: RawLock + Send> Send for FairRwReadGuard<'_, L> {}

impl<L: RawLock> Drop for FairRwReadGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.finish(self.node);
    }
}
