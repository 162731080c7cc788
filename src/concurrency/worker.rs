//! A double-buffered task queue serviced by exactly one background
//! thread.
//!
//! Producers push tasks into whichever buffer is currently "active"
//! (`buffers[active_buffer]`), guarded only by a cheap [`SpinLock`] —
//! pushing never blocks on the worker thread. [`Worker::flush`] is the
//! handoff: it swaps which buffer producers push into, and the worker
//! thread then drains the *other* buffer (the one producers just finished
//! filling) with no lock held at all, because the swap itself guarantees
//! no producer can still be touching it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::sync::{RawLock, SpinLock};

/// A unit of work a [`Worker`] executes. Panics inside a task are not
/// caught: a user task that wants to report failure must do so through
/// its own captured channel, per the crate's "workers never propagate
/// task failures" policy.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

const TERMINATED: isize = -1;

struct Shared {
    buffers: [UnsafeCell<Vec<Task>>; 2],
    /// 0 or 1: the buffer producers currently push into. `-1` once the
    /// worker has been told to terminate.
    active_buffer: AtomicIsize,
    push_lock: SpinLock,
    paused: Mutex<bool>,
    exec_cv: Condvar,
    wait_cv: Condvar,
    busy_wait: AtomicBool,
}

unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn wait_until_runnable(&self) -> bool {
        if self.busy_wait.load(Ordering::Relaxed) {
            loop {
                if self.active_buffer.load(Ordering::Acquire) == TERMINATED {
                    return false;
                }
                if !*self.paused.lock().unwrap() {
                    return true;
                }
                std::hint::spin_loop();
            }
        } else {
            let mut paused = self.paused.lock().unwrap();
            loop {
                if self.active_buffer.load(Ordering::Acquire) == TERMINATED {
                    return false;
                }
                if !*paused {
                    return true;
                }
                paused = self.exec_cv.wait(paused).unwrap();
            }
        }
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        if !shared.wait_until_runnable() {
            return;
        }
        let active = shared.active_buffer.load(Ordering::Acquire);
        debug_assert!(active == 0 || active == 1);
        let drain = 1 - active as usize;
        let tasks = unsafe { std::mem::take(&mut *shared.buffers[drain].get()) };
        log::trace!("worker: executing a batch of {} tasks", tasks.len());
        for task in tasks {
            task();
        }

        let mut paused = shared.paused.lock().unwrap();
        *paused = true;
        shared.wait_cv.notify_all();
    }
}

/// A single-thread, double-buffered task queue. See the module docs for
/// the producer/consumer handoff protocol.
pub struct Worker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// `busy_wait` selects how the worker thread (and [`Self::wait`])
    /// idles between batches: spin on an atomic flag, or block on a
    /// condition variable.
    pub fn new(busy_wait: bool) -> Self {
        let shared = Arc::new(Shared {
            buffers: [UnsafeCell::new(Vec::new()), UnsafeCell::new(Vec::new())],
            active_buffer: AtomicIsize::new(0),
            push_lock: SpinLock::new(),
            paused: Mutex::new(true),
            exec_cv: Condvar::new(),
            wait_cv: Condvar::new(),
            busy_wait: AtomicBool::new(busy_wait),
        });
        let thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("keelcore-worker".into())
                .spawn(move || run(shared))
                .expect("failed to spawn worker thread")
        };
        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Append a task to the buffer producers currently push into. A
    /// no-op once the worker has been told to terminate.
    pub fn push(&self, task: Task) {
        self.shared.push_lock.lock();
        let active = self.shared.active_buffer.load(Ordering::Acquire);
        if active != TERMINATED {
            unsafe {
                (*self.shared.buffers[active as usize].get()).push(task);
            }
        }
        self.shared.push_lock.unlock();
    }

    /// Convenience wrapper over [`Self::push`] for a plain closure.
    pub fn emplace<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.push(Box::new(f));
    }

    /// Swap the active buffer and wake the worker thread to drain the
    /// buffer producers just finished filling. A no-op (does not wake the
    /// worker) if that buffer is empty.
    ///
    /// Callers are expected to be quiescent with respect to `push` around
    /// a `flush` call — concurrently pushing into the buffer being handed
    /// off is not a supported pattern: producers only ever push to the
    /// active buffer, which `flush` is in the middle of swapping away
    /// from them.
    pub fn flush(&self) {
        self.shared.push_lock.lock();
        let active = self.shared.active_buffer.load(Ordering::Acquire);
        if active == TERMINATED {
            self.shared.push_lock.unlock();
            return;
        }
        let nonempty = unsafe { !(*self.shared.buffers[active as usize].get()).is_empty() };
        if nonempty {
            self.shared.active_buffer.store(1 - active, Ordering::Release);
        }
        self.shared.push_lock.unlock();

        if !nonempty {
            return;
        }

        let mut paused = self.shared.paused.lock().unwrap();
        *paused = false;
        self.shared.exec_cv.notify_one();
    }

    /// Whether the worker is idle (between batches).
    pub fn ready(&self) -> bool {
        *self.shared.paused.lock().unwrap()
    }

    /// Block until the worker is idle again (`ready()` would return
    /// `true`), either by spinning or by waiting on a condition variable,
    /// per [`Self::busy_waiting`].
    pub fn wait(&self) {
        if self.shared.busy_wait.load(Ordering::Relaxed) {
            while !self.ready() {
                std::hint::spin_loop();
            }
        } else {
            let mut paused = self.shared.paused.lock().unwrap();
            while !*paused {
                paused = self.shared.wait_cv.wait(paused).unwrap();
            }
        }
    }

    /// Switch between spin-waiting and condition-variable waiting for
    /// both the worker thread's idle loop and [`Self::wait`].
    pub fn busy_waiting(&self, busy_wait: bool) {
        self.shared.busy_wait.store(busy_wait, Ordering::Relaxed);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shared.active_buffer.store(TERMINATED, Ordering::Release);
        {
            let mut paused = self.shared.paused.lock().unwrap();
            *paused = false;
        }
        self.shared.exec_cv.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
