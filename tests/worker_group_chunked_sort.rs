//! Exercises `WorkerGroup` as a small parallel-sort harness, the same
//! spirit as the source library's own scheduler `quicksort` integration
//! test: partition a randomized array across the workers, let each sort
//! its own chunk, and check every chunk came back sorted with nothing
//! lost.

use std::sync::{Arc, Mutex};

use keelcore::concurrency::WorkerGroup;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_vec(len: usize, seed: u64) -> Vec<i64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-10_000..10_000)).collect()
}

#[test]
fn each_worker_sorts_its_own_chunk_exactly_once() {
    const WORKERS: usize = 8;
    const CHUNK_LEN: usize = 200;

    let data = random_vec(WORKERS * CHUNK_LEN, 0xC0FFEE);
    let original_multiset = {
        let mut v = data.clone();
        v.sort_unstable();
        v
    };

    let chunks: Vec<Arc<Mutex<Vec<i64>>>> = data
        .chunks(CHUNK_LEN)
        .map(|c| Arc::new(Mutex::new(c.to_vec())))
        .collect();

    let group = WorkerGroup::new(WORKERS, false);
    for (idx, chunk) in chunks.iter().enumerate() {
        let chunk = Arc::clone(chunk);
        group.push(idx, Box::new(move || {
            chunk.lock().unwrap().sort_unstable();
        }));
    }
    group.flush();
    group.wait();

    let mut recombined = Vec::with_capacity(data.len());
    for chunk in &chunks {
        let chunk = chunk.lock().unwrap();
        assert!(
            chunk.windows(2).all(|w| w[0] <= w[1]),
            "every chunk must come back sorted"
        );
        recombined.extend_from_slice(&chunk);
    }
    recombined.sort_unstable();

    assert_eq!(recombined, original_multiset, "no element lost or duplicated across workers");
}

#[test]
fn fast_worker_does_not_finish_the_batch_early_for_its_slower_siblings() {
    // Worker 0 has nothing to do and would return from the entry barrier
    // immediately; every other worker sleeps first. If the barrier let a
    // fast-in/fast-out worker count as "last out" while its siblings were
    // still asleep, this would intermittently observe fewer than 100 runs.
    const WORKERS: usize = 8;
    const ROUNDS: usize = 13;

    let group = WorkerGroup::new(WORKERS, false);
    let total = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    for round in 0..ROUNDS {
        for idx in 0..WORKERS {
            let total = Arc::clone(&total);
            group.push(idx, Box::new(move || {
                if idx != 0 {
                    std::thread::sleep(std::time::Duration::from_millis(2 + (round % 3) as u64));
                }
                total.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        group.flush();
        group.wait();
        assert_eq!(
            total.load(std::sync::atomic::Ordering::SeqCst),
            (round + 1) * WORKERS,
            "every task pushed so far must have run before wait() returned"
        );
    }
}

#[test]
fn flush_wait_cycle_runs_each_batch_exactly_once() {
    let group = WorkerGroup::new(4, true);
    let counters: Vec<_> = (0..4)
        .map(|_| Arc::new(std::sync::atomic::AtomicUsize::new(0)))
        .collect();

    for round in 0..3 {
        for (idx, counter) in counters.iter().enumerate() {
            let counter = Arc::clone(counter);
            group.push(idx, Box::new(move || {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        group.flush();
        group.wait();
        for counter in &counters {
            assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), round + 1);
        }
    }
}
