//! Unmanaged memory sources: the leaf of the allocator stack.
//!
//! A source has no notion of blocks, budgets, or headers — it only knows
//! how to hand back raw bytes and take them back. [`MallocSource`] wraps
//! the platform heap allocator; [`SystemSource`] talks to the platform's
//! page-granular virtual memory API directly (`mmap`/`munmap` on POSIX,
//! `VirtualAlloc`/`VirtualFree` on Windows).

use std::ptr::NonNull;

use crate::error::RecoverableError;

/// The leaf capability of the allocator stack: get raw bytes from the
/// platform, give them back. `free` without a size is only meaningful for
/// sources that track allocation size internally (see each impl's docs).
pub trait MemorySource {
    /// Request at least `bytes` of fresh memory. `None` on refusal; never
    /// panics for an ordinary out-of-memory condition.
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>>;

    /// Release memory previously returned by `allocate`, without knowing
    /// its size. Implementors that cannot support this document the
    /// fallback they use instead (see [`SystemSource::free`]).
    fn free(&self, ptr: NonNull<u8>);

    /// Release exactly `bytes` of memory previously returned by
    /// `allocate`. Always supported; the authoritative form of `free` for
    /// page-granular sources.
    fn free_sized(&self, ptr: NonNull<u8>, bytes: usize);
}

/// Wraps the platform heap (`malloc`/`free`). Unsized `free` is the
/// native operation here; sized `free` just discards the size and
/// forwards to the same `free`.
#[derive(Debug, Default)]
pub struct MallocSource;

impl MallocSource {
    pub const fn new() -> Self {
        Self
    }
}

impl MemorySource for MallocSource {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes == 0 {
            return None;
        }
        let ptr = unsafe { libc::malloc(bytes) } as *mut u8;
        let result = NonNull::new(ptr);
        if result.is_none() {
            log::warn!("{}: malloc({bytes})", RecoverableError::OutOfMemory);
        }
        result
    }

    fn free(&self, ptr: NonNull<u8>) {
        unsafe { libc::free(ptr.as_ptr() as *mut libc::c_void) }
    }

    fn free_sized(&self, ptr: NonNull<u8>, _bytes: usize) {
        self.free(ptr);
    }
}

/// Page-granular virtual memory, reserved and committed in one step.
/// `free` without a size releases exactly one page; `free_sized` rounds
/// `bytes` up to a whole number of pages and releases exactly that range,
/// per the page-mapped source contract.
#[derive(Debug)]
pub struct SystemSource {
    page_size: usize,
}

impl SystemSource {
    pub fn new() -> Self {
        Self {
            page_size: imp::page_size(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn round_up_to_page(&self, bytes: usize) -> usize {
        let page = self.page_size;
        (bytes + page - 1) / page * page
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for SystemSource {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes == 0 {
            return None;
        }
        let size = self.round_up_to_page(bytes);
        let result = imp::map(size);
        if result.is_none() {
            log::warn!("{}: system map of {size} bytes", RecoverableError::OutOfMemory);
        } else {
            log::trace!("system source mapped {size} bytes");
        }
        result
    }

    fn free(&self, ptr: NonNull<u8>) {
        log::debug!("system source: unsized free defaulting to one page ({} bytes)", self.page_size);
        imp::unmap(ptr, self.page_size);
    }

    fn free_sized(&self, ptr: NonNull<u8>, bytes: usize) {
        let size = self.round_up_to_page(bytes);
        imp::unmap(ptr, size);
    }
}

#[cfg(unix)]
mod imp {
    use std::ptr::NonNull;

    pub fn page_size() -> usize {
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz <= 0 {
            4096
        } else {
            sz as usize
        }
    }

    pub fn map(size: usize) -> Option<NonNull<u8>> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(ptr as *mut u8)
        }
    }

    pub fn unmap(ptr: NonNull<u8>, size: usize) {
        unsafe {
            libc::munmap(ptr.as_ptr() as *mut libc::c_void, size);
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::ptr::NonNull;
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::GetSystemInfo;

    pub fn page_size() -> usize {
        unsafe {
            let mut info = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        }
    }

    pub fn map(size: usize) -> Option<NonNull<u8>> {
        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        NonNull::new(ptr as *mut u8)
    }

    pub fn unmap(ptr: NonNull<u8>, _size: usize) {
        unsafe {
            VirtualFree(ptr.as_ptr() as *mut _, 0, MEM_RELEASE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_source_allocate_zero_is_none() {
        let s = MallocSource::new();
        assert!(s.allocate(0).is_none());
    }

    #[test]
    fn malloc_source_roundtrip() {
        let s = MallocSource::new();
        let p = s.allocate(64).expect("allocation");
        unsafe {
            p.as_ptr().write_bytes(0xAB, 64);
        }
        s.free(p);
    }

    #[test]
    fn system_source_roundtrip_rounds_to_page() {
        let s = SystemSource::new();
        let page = s.page_size();
        let p = s.allocate(1).expect("allocation");
        unsafe {
            p.as_ptr().write_bytes(0, page);
        }
        s.free_sized(p, 1);
    }

    #[test]
    fn system_source_allocate_zero_is_none() {
        let s = SystemSource::new();
        assert!(s.allocate(0).is_none());
    }
}
