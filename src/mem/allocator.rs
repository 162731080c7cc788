//! The composable allocator front: `calloc`, `realloc`, and the sentinel
//! contracts every layer above a [`crate::mem::MemorySource`] shares.
//!
//! Two small capability traits, [`Allocate`] and [`FreeSized`], are the
//! seams every layer in this stack composes at (constrained budget,
//! block rounding, pool, atomic wrapper, thread cache). [`Allocator`] is
//! a blanket extension over [`FreeSized`] providing `allocate_contiguous`
//! and `reallocate` for free, the same way a capability is split from its
//! convenience methods elsewhere in this crate.

use std::ptr::NonNull;

use crate::error::RecoverableError;

/// Request fresh memory. `allocate(0)` must return `None`.
pub trait Allocate {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>>;
}

/// Return memory to the layer below. `free(None)` and `free_sized(None, _)`
/// are no-ops, per the sentinel contract every layer shares.
pub trait FreeSized: Allocate {
    fn free(&self, ptr: Option<NonNull<u8>>);
    fn free_sized(&self, ptr: Option<NonNull<u8>>, bytes: usize);
}

/// The full composable allocator contract. Implemented for free for any
/// [`FreeSized`] type.
pub trait Allocator: FreeSized {
    /// Zero-filled array allocation. Fails with `None` (logging
    /// [`RecoverableError::Overflow`]) if `count * stride` would overflow.
    fn allocate_contiguous(&self, count: usize, stride: usize) -> Option<NonNull<u8>> {
        let bytes = match count.checked_mul(stride) {
            Some(b) => b,
            None => {
                log::warn!("{}: {count} * {stride}", RecoverableError::Overflow);
                return None;
            }
        };
        if bytes == 0 {
            return None;
        }
        let ptr = self.allocate(bytes)?;
        unsafe {
            ptr.as_ptr().write_bytes(0, bytes);
        }
        Some(ptr)
    }

    /// Grow, shrink, or free `ptr`, never in place.
    ///
    /// - `reallocate(None, 0)` is `None`.
    /// - `reallocate(None, n)` with `n > 0` allocates `n` zeroed bytes.
    /// - `reallocate(Some(p), 0)` frees `p` and returns `None`.
    /// - `reallocate(Some(p), n)` allocates `n` bytes, copies
    ///   `min(n, old_bytes)` bytes from `p` if `old_bytes` is known (else
    ///   zero-fills instead of copying), frees `p`, and returns the new
    ///   pointer. On allocation failure, `p` is left untouched.
    fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        new_bytes: usize,
        old_bytes: Option<usize>,
    ) -> Option<NonNull<u8>> {
        let Some(p) = ptr else {
            if new_bytes == 0 {
                return None;
            }
            let new_ptr = self.allocate(new_bytes)?;
            unsafe {
                new_ptr.as_ptr().write_bytes(0, new_bytes);
            }
            return Some(new_ptr);
        };

        if new_bytes == 0 {
            match old_bytes {
                Some(n) => self.free_sized(Some(p), n),
                None => self.free(Some(p)),
            }
            return None;
        }

        let new_ptr = self.allocate(new_bytes)?;
        unsafe {
            match old_bytes {
                Some(old) => {
                    let copy_len = old.min(new_bytes);
                    std::ptr::copy_nonoverlapping(p.as_ptr(), new_ptr.as_ptr(), copy_len);
                    if new_bytes > copy_len {
                        new_ptr.as_ptr().add(copy_len).write_bytes(0, new_bytes - copy_len);
                    }
                }
                None => new_ptr.as_ptr().write_bytes(0, new_bytes),
            }
        }

        match old_bytes {
            Some(n) => self.free_sized(Some(p), n),
            None => self.free(Some(p)),
        }
        Some(new_ptr)
    }
}

impl<T: FreeSized + ?Sized> Allocator for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MallocSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MallocAllocator {
        source: MallocSource,
        live_bytes: AtomicUsize,
    }

    impl MallocAllocator {
        fn new() -> Self {
            Self {
                source: MallocSource::new(),
                live_bytes: AtomicUsize::new(0),
            }
        }
    }

    impl Allocate for MallocAllocator {
        fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
            let p = crate::mem::MemorySource::allocate(&self.source, bytes)?;
            self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
            Some(p)
        }
    }

    impl FreeSized for MallocAllocator {
        fn free(&self, ptr: Option<NonNull<u8>>) {
            if let Some(p) = ptr {
                crate::mem::MemorySource::free(&self.source, p);
            }
        }

        fn free_sized(&self, ptr: Option<NonNull<u8>>, bytes: usize) {
            if let Some(p) = ptr {
                self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
                crate::mem::MemorySource::free_sized(&self.source, p, bytes);
            }
        }
    }

    #[test]
    fn sentinel_contracts() {
        let a = MallocAllocator::new();
        assert!(a.allocate(0).is_none());
        a.free(None);
        a.free_sized(None, 8);
        assert!(a.reallocate(None, 0, None).is_none());
        let p = a.allocate(16).unwrap();
        assert!(a.reallocate(Some(p), 0, Some(16)).is_none());
    }

    #[test]
    fn allocate_contiguous_is_zeroed_and_overflow_checked() {
        let a = MallocAllocator::new();
        assert!(a.allocate_contiguous(usize::MAX, 2).is_none());
        let p = a.allocate_contiguous(4, 8).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == 0));
        a.free_sized(Some(p), 32);
    }

    #[test]
    fn reallocate_grows_and_preserves_prefix() {
        let a = MallocAllocator::new();
        let p = a.allocate(8).unwrap();
        unsafe {
            p.as_ptr().write_bytes(0x42, 8);
        }
        let grown = a.reallocate(Some(p), 32, Some(8)).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 32) };
        assert!(bytes[..8].iter().all(|&b| b == 0x42));
        assert!(bytes[8..].iter().all(|&b| b == 0));
        a.free_sized(Some(grown), 32);
    }
}
