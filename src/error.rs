//! Error taxonomy for the crate.
//!
//! Allocation and lock contention failures are recoverable: they never cross
//! the public API as an `Err`, only as `None`/`false` (see module docs on
//! each component). [`RecoverableError`] exists purely so that the `log`
//! call at the failure site can say *why* without paying for a `Result` on
//! every hot-path call.
//!
//! Invariant violations are not recoverable. They are reported through
//! [`fatal`], which logs at `error` level and then aborts via `panic!`.
//! Nothing in this crate catches or converts a fatal escalation back into a
//! `Result`.

use std::fmt;

/// Reasons an allocation or lock-acquisition attempt failed. Never returned
/// from the public API; only threaded through a `log` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableError {
    /// The underlying memory source refused the request.
    OutOfMemory,
    /// `count * stride` would overflow `usize`.
    Overflow,
    /// A [`crate::mem::ConstrainedAllocator`] budget would be exceeded.
    BudgetExceeded,
}

impl fmt::Display for RecoverableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoverableError::OutOfMemory => write!(f, "memory source refused the request"),
            RecoverableError::Overflow => write!(f, "count * stride overflowed"),
            RecoverableError::BudgetExceeded => write!(f, "allocator budget exceeded"),
        }
    }
}

/// Kinds of invariant violation that escalate through [`fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// A pointer was freed twice, or lies within a live/free record already
    /// tracked by the pool.
    DoubleFree,
    /// A sized `free` reported a size that disagrees with the stored
    /// allocation header.
    SizeMismatch,
    /// An allocator that must track allocation sizes internally (e.g. a
    /// [`crate::mem::ConstrainedAllocator`]) was asked to free without one.
    UnsupportedUnsizedFree,
    /// A lock was released without a matching acquire, or an atomic counter
    /// observed a value its invariants forbid.
    InvariantViolation,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FatalKind::DoubleFree => "double free",
            FatalKind::SizeMismatch => "size mismatch on free",
            FatalKind::UnsupportedUnsizedFree => "unsized free is not supported here",
            FatalKind::InvariantViolation => "invariant violation",
        };
        f.write_str(s)
    }
}

/// Escalate a detected invariant violation: log it at `error` level, then
/// abort the process. Continuing after any of these is corruption, not a
/// degraded mode, so this function never returns.
#[cold]
#[track_caller]
pub fn fatal(kind: FatalKind, detail: &str) -> ! {
    log::error!("{kind}: {detail}");
    panic!("{kind}: {detail}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_error_display_is_non_empty() {
        for e in [
            RecoverableError::OutOfMemory,
            RecoverableError::Overflow,
            RecoverableError::BudgetExceeded,
        ] {
            assert!(!e.to_string().is_empty());
        }
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn fatal_aborts() {
        fatal(FatalKind::DoubleFree, "test pointer");
    }
}
