//! Rounds every request up to a multiple of a fixed block size before
//! forwarding to an underlying allocator.
//!
//! Exists to adapt callers that ask for arbitrary byte counts to a
//! downstream layer that only wants to deal in whole blocks (most notably
//! [`crate::mem::GeneralPool`] fed by a [`crate::mem::SystemSource`]).

use std::ptr::NonNull;

use crate::mem::{Allocate, FreeSized};

/// Wraps an allocator, rounding every request (and every sized free) up to
/// a multiple of `BLOCK_SIZE`.
pub struct BlockAllocator<A, const BLOCK_SIZE: usize> {
    inner: A,
}

impl<A, const BLOCK_SIZE: usize> BlockAllocator<A, BLOCK_SIZE> {
    pub const fn new(inner: A) -> Self {
        static_assertions::const_assert!(BLOCK_SIZE > 0);
        Self { inner }
    }

    pub const fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    const fn round_up(bytes: usize) -> usize {
        (bytes + BLOCK_SIZE - 1) / BLOCK_SIZE * BLOCK_SIZE
    }
}

impl<A: Allocate, const BLOCK_SIZE: usize> Allocate for BlockAllocator<A, BLOCK_SIZE> {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes == 0 {
            return None;
        }
        self.inner.allocate(Self::round_up(bytes))
    }
}

impl<A: FreeSized, const BLOCK_SIZE: usize> FreeSized for BlockAllocator<A, BLOCK_SIZE> {
    fn free(&self, ptr: Option<NonNull<u8>>) {
        self.inner.free(ptr);
    }

    fn free_sized(&self, ptr: Option<NonNull<u8>>, bytes: usize) {
        if ptr.is_some() {
            self.inner.free_sized(ptr, Self::round_up(bytes));
        }
    }
}
