//! `N` interchangeable workers sharing one double-buffered handoff, with
//! barrier semantics: a [`WorkerGroup::flush`] is not "done" until every
//! worker with work in the drained buffer has finished its share.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::sync::{RawLock, SpinLock};

pub use crate::concurrency::worker::Task;

const TERMINATED: isize = -1;

struct Shared {
    /// `buffers[i][b]` is worker `i`'s queue for buffer slot `b`.
    buffers: Vec<[UnsafeCell<Vec<Task>>; 2]>,
    active_buffer: AtomicIsize,
    push_lock: SpinLock,
    /// Counts workers that have entered the current batch. Doubles as
    /// both halves of the barrier: workers spin here until it reaches
    /// `buffers.len()` (entry — nobody drains until everybody has woken
    /// up and registered), then count back down as each worker finishes
    /// its share (exit — whoever brings it back to zero is the true last
    /// one out).
    active_workers: AtomicIsize,
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

fn run(shared: Arc<Shared>, idx: usize) {
    let concurrency = shared.buffers.len() as isize;
    loop {
        if !shared.wait_until_runnable() {
            return;
        }
        let active = shared.active_buffer.load(Ordering::Acquire);
        if active == TERMINATED {
            return;
        }
        let drain = 1 - active as usize;

        // Worker 0 holds the `paused`/wait lock for the whole batch —
        // the same "wait lock" the original pins to whichever thread
        // enters first, made deterministic here since every worker is
        // about to register at the entry barrier below, so worker 0 can
        // always play that role without a race to claim it.
        let mut paused_guard = (idx == 0).then(|| shared.paused.lock().unwrap());

        // Entry barrier: every worker must register here before any of
        // them starts draining. Without this, a fast worker could finish,
        // decrement back to zero, and be mistaken for "last out" while a
        // slower sibling hasn't even woken up yet — dropping that
        // sibling's share of the batch.
        shared.active_workers.fetch_add(1, Ordering::AcqRel);
        while shared.active_workers.load(Ordering::Acquire) < concurrency {
            std::hint::spin_loop();
        }

        let tasks = unsafe { std::mem::take(&mut *shared.buffers[idx][drain].get()) };
        log::trace!("worker {idx}: executing a batch of {} tasks", tasks.len());
        for task in tasks {
            task();
        }

        let left = shared.active_workers.fetch_sub(1, Ordering::AcqRel);
        if left == 1 {
            // True last-out: the entry barrier guarantees every worker had
            // already registered, so nobody else can still be asleep.
            let mut paused = paused_guard.take().unwrap_or_else(|| shared.paused.lock().unwrap());
            *paused = true;
            shared.wait_cv.notify_all();
        }
    }
}

/// A fixed-size pool of interchangeable workers draining a shared
/// double-buffered queue. Push targets a specific worker's slot; flush and
/// the barrier are group-wide.
pub struct WorkerGroup {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    concurrency: usize,
    busy_wait: bool,
}

impl WorkerGroup {
    pub fn new(concurrency: usize, busy_wait: bool) -> Self {
        assert!(concurrency > 0, "a worker group needs at least one worker");
        let shared = Arc::new(Shared {
            buffers: (0..concurrency)
                .map(|_| [UnsafeCell::new(Vec::new()), UnsafeCell::new(Vec::new())])
                .collect(),
            active_buffer: AtomicIsize::new(0),
            push_lock: SpinLock::new(),
            active_workers: AtomicIsize::new(0),
            paused: Mutex::new(true),
            exec_cv: Condvar::new(),
            wait_cv: Condvar::new(),
            busy_wait: AtomicBool::new(busy_wait),
        });
        let threads = Self::spawn_all(&shared, concurrency);
        Self {
            shared,
            threads,
            concurrency,
            busy_wait,
        }
    }

    fn spawn_all(shared: &Arc<Shared>, concurrency: usize) -> Vec<JoinHandle<()>> {
        (0..concurrency)
            .map(|idx| {
                let shared = Arc::clone(shared);
                std::thread::Builder::new()
                    .name(format!("keelcore-worker-{idx}"))
                    .spawn(move || run(shared, idx))
                    .expect("failed to spawn worker group thread")
            })
            .collect()
    }

    /// A group sized to the number of logical CPUs, matching the default
    /// worker count the source scheduler picks for its thread pool.
    pub fn new_for_available_parallelism(busy_wait: bool) -> Self {
        Self::new(num_cpus::get(), busy_wait)
    }

    /// How many workers currently make up the group.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Push a task into worker `idx`'s slot of the active buffer.
    ///
    /// # Panics
    /// Panics if `idx >= self.concurrency()`.
    pub fn push(&self, idx: usize, task: Task) {
        assert!(idx < self.concurrency, "worker index out of range");
        self.shared.push_lock.lock();
        let active = self.shared.active_buffer.load(Ordering::Acquire);
        if active != TERMINATED {
            unsafe {
                (*self.shared.buffers[idx][active as usize].get()).push(task);
            }
        }
        self.shared.push_lock.unlock();
    }

    /// Convenience wrapper over [`Self::push`] for a plain closure.
    pub fn emplace<F: FnOnce() + Send + 'static>(&self, idx: usize, f: F) {
        self.push(idx, Box::new(f));
    }

    /// Swap the active buffer and wake every worker, if any worker's
    /// buffer has work in it.
    pub fn flush(&self) {
        self.shared.push_lock.lock();
        let active = self.shared.active_buffer.load(Ordering::Acquire);
        if active == TERMINATED {
            self.shared.push_lock.unlock();
            return;
        }
        let nonempty = self
            .shared
            .buffers
            .iter()
            .any(|slots| unsafe { !(*slots[active as usize].get()).is_empty() });
        if nonempty {
            self.shared.active_buffer.store(1 - active, Ordering::Release);
        }
        self.shared.push_lock.unlock();

        if !nonempty {
            return;
        }

        let mut paused = self.shared.paused.lock().unwrap();
        *paused = false;
        self.shared.exec_cv.notify_all();
    }

    /// Whether every worker is idle (between batches).
    pub fn ready(&self) -> bool {
        *self.shared.paused.lock().unwrap()
    }

    /// Block until every worker has finished the current batch.
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

    pub fn busy_waiting(&self, busy_wait: bool) {
        self.shared.busy_wait.store(busy_wait, Ordering::Relaxed);
    }

    fn terminate_and_join(&mut self) {
        self.shared.active_buffer.store(TERMINATED, Ordering::Release);
        {
            let mut paused = self.shared.paused.lock().unwrap();
            *paused = false;
        }
        self.shared.exec_cv.notify_all();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }

    /// Reconfigure the group to run `concurrency` workers.
    ///
    /// Waits for the in-flight batch to finish, joins every existing
    /// worker thread, resizes the per-worker buffer table, then respawns —
    /// in that order, so no worker thread ever observes a buffer table
    /// resized out from under it.
    pub fn set_concurrency(&mut self, concurrency: usize) {
        assert!(concurrency > 0, "a worker group needs at least one worker");
        self.wait();
        self.terminate_and_join();

        let shared = Arc::new(Shared {
            buffers: (0..concurrency)
                .map(|_| [UnsafeCell::new(Vec::new()), UnsafeCell::new(Vec::new())])
                .collect(),
            active_buffer: AtomicIsize::new(0),
            push_lock: SpinLock::new(),
            active_workers: AtomicIsize::new(0),
            paused: Mutex::new(true),
            exec_cv: Condvar::new(),
            wait_cv: Condvar::new(),
            busy_wait: AtomicBool::new(self.busy_wait),
        });
        self.threads = Self::spawn_all(&shared, concurrency);
        self.shared = shared;
        self.concurrency = concurrency;
        log::debug!("worker group: reconfigured to {concurrency} workers");
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        self.terminate_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn each_worker_runs_its_own_pushed_tasks() {
        let group = WorkerGroup::new(4, false);
        let total = Arc::new(AtomicU64::new(0));
        for idx in 0..4 {
            let total = Arc::clone(&total);
            group.push(idx, Box::new(move || {
                total.fetch_add(1, Ordering::SeqCst);
            }));
        }
        group.flush();
        group.wait();
        assert_eq!(total.load(Ordering::SeqCst), 4);
        assert!(group.ready());
    }

    #[test]
    fn flush_is_a_barrier_all_workers_finish_before_wait_returns() {
        let group = WorkerGroup::new(3, false);
        let total = Arc::new(AtomicU64::new(0));
        for idx in 0..3 {
            let total = Arc::clone(&total);
            group.push(idx, Box::new(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                total.fetch_add(1, Ordering::SeqCst);
            }));
        }
        group.flush();
        group.wait();
        assert_eq!(total.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn flush_on_empty_buffers_is_a_true_no_op() {
        let group = WorkerGroup::new(2, true);
        assert!(group.ready());
        group.flush();
        assert!(group.ready());
    }

    #[test]
    fn reconfiguring_concurrency_changes_the_worker_count_and_keeps_working() {
        let mut group = WorkerGroup::new(2, false);
        assert_eq!(group.concurrency(), 2);
        group.set_concurrency(5);
        assert_eq!(group.concurrency(), 5);

        let total = Arc::new(AtomicU64::new(0));
        for idx in 0..5 {
            let total = Arc::clone(&total);
            group.push(idx, Box::new(move || {
                total.fetch_add(1, Ordering::SeqCst);
            }));
        }
        group.flush();
        group.wait();
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[test]
    #[should_panic(expected = "worker index out of range")]
    fn pushing_to_an_out_of_range_worker_panics() {
        let group = WorkerGroup::new(2, false);
        group.push(2, Box::new(|| {}));
    }
}
