//! A per-thread allocator front-end over a shared thread-safe allocator.
//!
//! The hot allocate/free path never touches the shared parent's lock in
//! the common case: each thread keeps its own [`GeneralPool`] slabs,
//! requesting a fresh slab from the parent only when every slab it
//! already owns is exhausted, and returning an emptied slab to the parent
//! only once the thread has more slabs than its high-water mark.
//!
//! The parent is held by [`Weak`], not [`Arc`] — this is the crate's
//! answer to the source library's allocator/thread-cache cyclic
//! back-reference (see the design notes on cyclic back-references):
//! nothing here keeps the parent alive, so once every strong owner drops
//! it, every thread's cache entry for it observes the invalidation on its
//! next access (`Weak::upgrade` returns `None`) instead of dereferencing a
//! dangling identity.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};
use std::thread::LocalKey;

use crate::error::{fatal, FatalKind};
use crate::mem::pool::GeneralPool;
use crate::mem::{Allocate, FreeSized};

struct Slab {
    pool: GeneralPool,
    base: NonNull<u8>,
    size: usize,
}

struct CacheEntry<P> {
    parent_key: usize,
    parent: Weak<P>,
    slabs: Vec<Slab>,
}

impl<P: Allocate + FreeSized> CacheEntry<P> {
    fn new(parent_key: usize, parent: Weak<P>) -> Self {
        Self {
            parent_key,
            parent,
            slabs: Vec::new(),
        }
    }

    fn allocate(&mut self, parent: &P, bytes: usize, slab_bytes: usize, block_size: usize) -> Option<NonNull<u8>> {
        for slab in &self.slabs {
            if let Some(p) = slab.pool.allocate(bytes) {
                return Some(p);
            }
        }

        // Miss across every slab we own: one locked call into the parent
        // to refill, then retry against the fresh slab.
        let header_and_payload = bytes.saturating_add(block_size);
        let size = header_and_payload.max(slab_bytes);
        let size = (size + block_size - 1) / block_size * block_size;
        let base = parent.allocate(size)?;
        log::debug!("thread cache: refilled a {size}-byte slab from parent {:#x}", self.parent_key);
        let pool = unsafe { GeneralPool::from_raw(base, size, block_size) };
        self.slabs.push(Slab { pool, base, size });
        self.slabs.last().unwrap().pool.allocate(bytes)
    }

    fn free(&mut self, parent: &P, ptr: NonNull<u8>, bytes: usize, high_water_slabs: usize) {
        let addr = ptr.as_ptr() as usize;
        let Some(idx) = self.slabs.iter().position(|s| {
            let base = s.base.as_ptr() as usize;
            addr >= base && addr < base + s.size
        }) else {
            fatal(
                FatalKind::InvariantViolation,
                "freed pointer does not belong to any slab this thread owns for this parent",
            );
        };

        self.slabs[idx].pool.free_sized(Some(ptr), bytes);

        let slab_is_empty =
            self.slabs[idx].pool.free_block_count() == self.slabs[idx].pool.table_block_count();
        if slab_is_empty && self.slabs.len() > high_water_slabs {
            let slab = self.slabs.remove(idx);
            parent.free_sized(Some(slab.base), slab.size);
            log::debug!("thread cache: flushed an empty {}-byte slab back to parent", slab.size);
        }
    }
}

fn thread_cache<P>() -> &'static LocalKey<RefCell<Vec<CacheEntry<P>>>>
where
    P: Allocate + FreeSized + Send + Sync + 'static,
{
    thread_local! {
        static CACHE: RefCell<Vec<CacheEntry<P>>> = const { RefCell::new(Vec::new()) };
    }
    &CACHE
}

/// A per-thread front-end over a shared thread-safe allocator `P`
/// (typically [`crate::mem::AtomicAllocator<GeneralPool>`]). Every clone of
/// a `ThreadedAllocator` that shares the same parent shares the same
/// per-thread cache entries, keyed by the parent's identity.
pub struct ThreadedAllocator<P: Allocate + FreeSized + Send + Sync + 'static> {
    parent: Weak<P>,
    block_size: usize,
    slab_bytes: usize,
    high_water_slabs: usize,
}

impl<P: Allocate + FreeSized + Send + Sync + 'static> ThreadedAllocator<P> {
    /// `block_size` must match the per-thread [`GeneralPool`] slabs'
    /// block size; `slab_bytes` is the default refill size requested from
    /// `parent` (a request larger than this still gets a slab sized to
    /// fit it).
    pub fn new(parent: &Arc<P>, block_size: usize, slab_bytes: usize) -> Self {
        Self {
            parent: Arc::downgrade(parent),
            block_size,
            slab_bytes,
            high_water_slabs: 1,
        }
    }

    /// Set how many fully-emptied slabs this thread keeps around before
    /// flushing the extras back to the parent (default: `1`).
    pub fn with_high_water_slabs(mut self, slabs: usize) -> Self {
        self.high_water_slabs = slabs.max(1);
        self
    }

    fn parent_key(&self) -> usize {
        self.parent.as_ptr() as *const () as usize
    }
}

impl<P: Allocate + FreeSized + Send + Sync + 'static> Clone for ThreadedAllocator<P> {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            block_size: self.block_size,
            slab_bytes: self.slab_bytes,
            high_water_slabs: self.high_water_slabs,
        }
    }
}

impl<P: Allocate + FreeSized + Send + Sync + 'static> Allocate for ThreadedAllocator<P> {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes == 0 {
            return None;
        }
        let parent = self.parent.upgrade()?;
        let key = self.parent_key();
        thread_cache::<P>().with(|cache| {
            let mut cache = cache.borrow_mut();
            cache.retain(|e| e.parent.strong_count() > 0);
            let idx = match cache.iter().position(|e| e.parent_key == key) {
                Some(i) => i,
                None => {
                    cache.push(CacheEntry::new(key, Weak::clone(&self.parent)));
                    cache.len() - 1
                }
            };
            cache[idx].allocate(&parent, bytes, self.slab_bytes, self.block_size)
        })
    }
}

impl<P: Allocate + FreeSized + Send + Sync + 'static> FreeSized for ThreadedAllocator<P> {
    /// Unsized free is not supported: every allocation this front-end
    /// hands out is housed in a header-carrying [`GeneralPool`] record,
    /// which requires the size to locate.
    fn free(&self, ptr: Option<NonNull<u8>>) {
        if ptr.is_some() {
            fatal(
                FatalKind::UnsupportedUnsizedFree,
                "ThreadedAllocator requires a sized free",
            );
        }
    }

    fn free_sized(&self, ptr: Option<NonNull<u8>>, bytes: usize) {
        let Some(p) = ptr else { return };
        // If the parent has already been dropped, the slab memory it
        // handed out was reclaimed along with it; there is nothing left
        // to free and no parent left to free it to.
        let Some(parent) = self.parent.upgrade() else {
            log::debug!("thread cache: free_sized after parent was dropped; ignoring");
            return;
        };
        let key = self.parent_key();
        thread_cache::<P>().with(|cache| {
            let mut cache = cache.borrow_mut();
            if let Some(entry) = cache.iter_mut().find(|e| e.parent_key == key) {
                entry.free(&parent, p, bytes, self.high_water_slabs);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{AtomicAllocator, Allocator, GeneralPool};

    type Parent = AtomicAllocator<GeneralPool>;

    fn parent() -> Arc<Parent> {
        Arc::new(AtomicAllocator::new(GeneralPool::new(16 * 1024, 16)))
    }

    #[test]
    fn allocates_and_frees_through_a_refilled_slab() {
        let parent = parent();
        let cache = ThreadedAllocator::new(&parent, 16, 256);
        let p = cache.allocate(48).expect("first allocation refills a slab");
        cache.free_sized(Some(p), 48);
    }

    #[test]
    fn serves_many_allocations_without_repeated_parent_contention() {
        let parent = parent();
        let cache = ThreadedAllocator::new(&parent, 16, 512);
        let mut live = Vec::new();
        for _ in 0..20 {
            live.push(cache.allocate(32).expect("room in the table"));
        }
        for p in live {
            cache.free_sized(Some(p), 32);
        }
    }

    #[test]
    fn dropping_the_parent_invalidates_the_cache() {
        let parent = parent();
        let cache = ThreadedAllocator::new(&parent, 16, 256);
        let p = cache.allocate(32).expect("parent alive");
        cache.free_sized(Some(p), 32);
        drop(parent);
        assert!(cache.allocate(32).is_none(), "parent gone: no further service");
    }

    #[test]
    fn sentinel_contracts() {
        let parent = parent();
        let cache = ThreadedAllocator::new(&parent, 16, 256);
        assert!(cache.allocate(0).is_none());
        cache.free(None);
        cache.free_sized(None, 16);
    }

    #[test]
    fn concurrent_threads_each_get_their_own_slabs() {
        use std::thread;

        let parent = parent();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let parent = Arc::clone(&parent);
                thread::spawn(move || {
                    let cache = ThreadedAllocator::new(&parent, 16, 256);
                    let mut held = Vec::new();
                    for _ in 0..50 {
                        if let Some(p) = cache.allocate(32) {
                            held.push(p);
                        }
                    }
                    for p in held {
                        cache.free_sized(Some(p), 32);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
    }
}
