//! A fixed-block free-list pool supporting both single-block and
//! multi-block ("array") allocations over a pre-sized table.
//!
//! This is the hardest single piece of the allocator stack: the free list
//! is a singly linked, strictly address-ordered list of inline records
//! living inside the free blocks themselves, and every free coalesces with
//! its physically adjacent neighbors. A multi-block allocation reserves a
//! whole extra block at its front for a header (`{blocks, next}`) so that
//! a sized free can recover exactly how many blocks to return; a
//! single-block allocation carries no header at all — the caller is
//! trusted to remember it was single-block.
//!
//! [`GeneralPool`] itself assumes single-threaded access: wrap it in
//! [`crate::mem::AtomicAllocator`] or use it as the per-thread
//! sub-allocator inside [`crate::mem::ThreadedAllocator`] for multi-thread
//! use.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::Cell;
use std::ptr::NonNull;

use crate::error::{fatal, FatalKind};
use crate::mem::{Allocate, FreeSized};

/// The `{blocks, next}` pair that lives inline at the start of every free
/// record, and at the start of every multi-block allocation's header
/// block. `next` is `None`-encoded as a null pointer; the table is
/// heap-allocated, so address zero never occurs as a real block address.
#[derive(Clone, Copy)]
struct Record {
    blocks: usize,
    next: Option<NonNull<u8>>,
}

/// A fixed-block pool over a table sized at construction. Not `Sync`: the
/// free list (`head`) is plain [`Cell`]-based interior mutability, so
/// concurrent use requires external serialization.
pub struct GeneralPool {
    table: NonNull<u8>,
    table_size: usize,
    block_size: usize,
    head: Cell<Option<NonNull<u8>>>,
    owns_table: bool,
}

unsafe impl Send for GeneralPool {}

impl GeneralPool {
    fn check_layout(table_size: usize, block_size: usize) {
        assert!(block_size.is_power_of_two(), "block_size must be a power of two");
        assert!(
            block_size >= std::mem::size_of::<Record>(),
            "block_size must be at least {} bytes (the inline header)",
            std::mem::size_of::<Record>()
        );
        assert!(table_size >= block_size, "table_size must be at least one block");
        assert!(table_size % block_size == 0, "table_size must be a multiple of block_size");
    }

    fn over(table: NonNull<u8>, table_size: usize, block_size: usize, owns_table: bool) -> Self {
        Self::check_layout(table_size, block_size);
        let pool = Self {
            table,
            table_size,
            block_size,
            head: Cell::new(Some(table)),
            owns_table,
        };
        unsafe {
            pool.write_record(
                table,
                Record {
                    blocks: table_size / block_size,
                    next: None,
                },
            );
        }
        log::debug!(
            "GeneralPool: {} blocks of {} bytes ({})",
            table_size / block_size,
            block_size,
            if owns_table { "owned table" } else { "borrowed slab" }
        );
        pool
    }

    /// Allocates and owns its own table via the global allocator,
    /// deallocating it on `Drop`.
    ///
    /// # Panics
    /// If `block_size` is not a power of two, is smaller than the inline
    /// header (two machine words), or `table_size` is not a positive
    /// multiple of `block_size`. These are construction-time programmer
    /// errors, not recoverable runtime conditions.
    pub fn new(table_size: usize, block_size: usize) -> Self {
        Self::check_layout(table_size, block_size);
        let layout = Layout::from_size_align(table_size, block_size).expect("valid pool layout");
        let table = NonNull::new(unsafe { alloc(layout) }).expect("pool table allocation failed");
        Self::over(table, table_size, block_size, true)
    }

    /// Builds a pool over a table this pool does not own: `Drop` will not
    /// free it. Used by [`crate::mem::ThreadedAllocator`] to turn a slab
    /// obtained from a parent allocator into a per-thread sub-allocator;
    /// the slab is instead returned to the parent with its own
    /// `free_sized` call when evicted.
    ///
    /// # Safety
    /// `table` must point to at least `table_size` bytes, valid for the
    /// lifetime of the returned pool, not aliased by any other live
    /// pointer, and aligned to `block_size`.
    pub unsafe fn from_raw(table: NonNull<u8>, table_size: usize, block_size: usize) -> Self {
        Self::over(table, table_size, block_size, false)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn table_block_count(&self) -> usize {
        self.table_size / self.block_size
    }

    /// Sum of `blocks` over every record currently on the free list.
    /// Exposed so tests can check that free blocks plus live blocks always
    /// equals the table's total block count.
    pub fn free_block_count(&self) -> usize {
        let mut total = 0;
        let mut cur = self.head.get();
        while let Some(c) = cur {
            let rec = unsafe { self.read_record(c) };
            total += rec.blocks;
            cur = rec.next;
        }
        total
    }

    unsafe fn read_record(&self, addr: NonNull<u8>) -> Record {
        let words = addr.as_ptr() as *const usize;
        let blocks = words.read();
        let next_raw = words.add(1).read();
        Record {
            blocks,
            next: NonNull::new(next_raw as *mut u8),
        }
    }

    unsafe fn write_record(&self, addr: NonNull<u8>, rec: Record) {
        let words = addr.as_ptr() as *mut usize;
        words.write(rec.blocks);
        words.add(1).write(rec.next.map_or(0, |p| p.as_ptr() as usize));
    }

    fn blocks_needed(&self, bytes: usize) -> usize {
        // A multi-block allocation reserves one whole block for its
        // header, per the data model's `address - block_size` header
        // placement: ceil((bytes + block_size) / block_size), which
        // simplifies to ceil(bytes / block_size) + 1.
        (bytes + self.block_size - 1) / self.block_size + 1
    }

    /// Detach exactly one block from the head of the free list. The
    /// returned block carries no header; the caller must remember it was
    /// obtained this way in order to free it with [`Self::free_one_block`].
    pub fn allocate_one_block(&self) -> Option<NonNull<u8>> {
        let head = self.head.get()?;
        let rec = unsafe { self.read_record(head) };
        if rec.blocks == 1 {
            self.head.set(rec.next);
        } else {
            let advanced = unsafe { NonNull::new_unchecked(head.as_ptr().add(self.block_size)) };
            unsafe {
                self.write_record(
                    advanced,
                    Record {
                        blocks: rec.blocks - 1,
                        next: rec.next,
                    },
                );
            }
            self.head.set(Some(advanced));
        }
        log::trace!("pool: allocated single block at {:p}", head.as_ptr());
        Some(head)
    }

    /// Return a block obtained from [`Self::allocate_one_block`]. Cannot
    /// detect a double-free against a block freed this way (no size is
    /// carried); see [`Self::free`] for the sized, double-free-checked
    /// alternative.
    pub fn free_one_block(&self, ptr: NonNull<u8>) {
        self.insert_and_coalesce(ptr, 1);
    }

    /// First-fit walk of the free list for a run of at least `k` blocks,
    /// splitting the tail off the chosen record. On success, writes the
    /// `{k, None}` header at the base address and returns the payload
    /// pointer (`base + block_size`).
    fn allocate_blocks(&self, k: usize) -> Option<NonNull<u8>> {
        let mut prev: Option<NonNull<u8>> = None;
        let mut cur = self.head.get();
        while let Some(c) = cur {
            let rec = unsafe { self.read_record(c) };
            if rec.blocks >= k {
                break;
            }
            prev = Some(c);
            cur = rec.next;
        }

        let record_addr = cur?;
        let rec = unsafe { self.read_record(record_addr) };

        if rec.blocks == k {
            match prev {
                Some(p) => {
                    let mut prec = unsafe { self.read_record(p) };
                    prec.next = rec.next;
                    unsafe { self.write_record(p, prec) };
                }
                None => self.head.set(rec.next),
            }
        } else {
            let remainder = unsafe { NonNull::new_unchecked(record_addr.as_ptr().add(k * self.block_size)) };
            unsafe {
                self.write_record(
                    remainder,
                    Record {
                        blocks: rec.blocks - k,
                        next: rec.next,
                    },
                );
            }
            match prev {
                Some(p) => {
                    let mut prec = unsafe { self.read_record(p) };
                    prec.next = Some(remainder);
                    unsafe { self.write_record(p, prec) };
                }
                None => self.head.set(Some(remainder)),
            }
        }

        unsafe {
            self.write_record(record_addr, Record { blocks: k, next: None });
        }
        let payload = unsafe { NonNull::new_unchecked(record_addr.as_ptr().add(self.block_size)) };
        log::trace!("pool: allocated {k}-block run, header at {:p}, payload at {:p}", record_addr.as_ptr(), payload.as_ptr());
        Some(payload)
    }

    /// Insert a newly freed record of `blocks` blocks at `addr`, keeping
    /// the free list address-ordered, then coalesce with whichever
    /// physical neighbors turn out to be adjacent. Aborts via
    /// [`FatalKind::DoubleFree`] if `addr` coincides with or falls inside
    /// an already-free record.
    fn insert_and_coalesce(&self, addr: NonNull<u8>, blocks: usize) {
        let target = addr.as_ptr() as usize;

        let mut prev: Option<NonNull<u8>> = None;
        let mut cur = self.head.get();
        while let Some(c) = cur {
            let c_addr = c.as_ptr() as usize;
            let rec = unsafe { self.read_record(c) };
            let c_end = c_addr + rec.blocks * self.block_size;
            if target >= c_addr && target < c_end {
                fatal(
                    FatalKind::DoubleFree,
                    &format!("address {target:#x} already lies within a free record at {c_addr:#x}"),
                );
            }
            if c_addr > target {
                break;
            }
            prev = Some(c);
            cur = rec.next;
        }

        unsafe {
            self.write_record(addr, Record { blocks, next: cur });
        }
        match prev {
            Some(p) => {
                let mut prec = unsafe { self.read_record(p) };
                prec.next = Some(addr);
                unsafe { self.write_record(p, prec) };
            }
            None => self.head.set(Some(addr)),
        }

        let mut effective_addr = addr;
        let mut effective_blocks = blocks;

        if let Some(p) = prev {
            let mut prec = unsafe { self.read_record(p) };
            let p_end = p.as_ptr() as usize + prec.blocks * self.block_size;
            if p_end == target {
                prec.blocks += effective_blocks;
                prec.next = cur;
                unsafe { self.write_record(p, prec) };
                effective_addr = p;
                effective_blocks = prec.blocks;
                log::trace!("pool: coalesced new record into predecessor at {:p}", p.as_ptr());
            }
        }

        if let Some(n) = cur {
            let eff_end = effective_addr.as_ptr() as usize + effective_blocks * self.block_size;
            if eff_end == n.as_ptr() as usize {
                let nrec = unsafe { self.read_record(n) };
                let mut erec = unsafe { self.read_record(effective_addr) };
                erec.blocks = effective_blocks + nrec.blocks;
                erec.next = nrec.next;
                unsafe { self.write_record(effective_addr, erec) };
                log::trace!("pool: coalesced successor at {:p} into record at {:p}", n.as_ptr(), effective_addr.as_ptr());
            }
        }
    }
}

#[cfg(feature = "test_private")]
impl GeneralPool {
    /// The block count recorded in the header immediately preceding
    /// `payload` from a multi-block allocation. Exposed only under
    /// `test_private`: integration tests under `tests/` run in a separate
    /// compilation unit and so cannot reach the crate-private
    /// `read_record` directly.
    pub fn header_block_count(&self, payload: NonNull<u8>) -> usize {
        let header_addr = unsafe { NonNull::new_unchecked(payload.as_ptr().sub(self.block_size)) };
        unsafe { self.read_record(header_addr) }.blocks
    }
}

impl Drop for GeneralPool {
    fn drop(&mut self) {
        if !self.owns_table {
            return;
        }
        let layout = Layout::from_size_align(self.table_size, self.block_size).expect("valid pool layout");
        unsafe {
            dealloc(self.table.as_ptr(), layout);
        }
    }
}

impl Allocate for GeneralPool {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes == 0 {
            return None;
        }
        let k = self.blocks_needed(bytes);
        self.allocate_blocks(k)
    }
}

impl FreeSized for GeneralPool {
    /// Sized free is the only double-free-checked path; see
    /// [`Self::free_one_block`] for the unchecked single-block form this
    /// crate also exposes as a distinct, lower-level operation.
    fn free(&self, ptr: Option<NonNull<u8>>) {
        let Some(p) = ptr else { return };
        // No size means this can only have been a single-block
        // allocation; treat it as such, same trade-off as the unsized
        // memory-source free.
        self.free_one_block(p);
    }

    fn free_sized(&self, ptr: Option<NonNull<u8>>, bytes: usize) {
        let Some(p) = ptr else { return };
        let k = self.blocks_needed(bytes);
        let record_addr = unsafe { NonNull::new_unchecked(p.as_ptr().sub(self.block_size)) };
        let header = unsafe { self.read_record(record_addr) };
        if header.blocks != k {
            fatal(
                FatalKind::SizeMismatch,
                &format!("freed with size implying {k} blocks but header records {}", header.blocks),
            );
        }
        self.insert_and_coalesce(record_addr, k);
    }
}
