//! keelcore is a small set of composable primitives for building
//! allocators and concurrent runtimes: a layered, byte-budgeted,
//! per-thread-caching memory allocator stack ([`mem`]); a set of
//! exclusive and shared-access locking primitives built from scratch on
//! top of atomics ([`sync`]); and double-buffered background task
//! execution for one worker or a fixed pool of them ([`concurrency`]).
//!
//! None of these pieces depend on the others — pick what you need. The
//! allocator stack's thread-safe layers are built from the synchronization
//! primitives, but `sync` and `concurrency` are equally usable standalone.
//!
//! Recoverable conditions (budget exhaustion, allocator exhaustion) are
//! reported through `Option`/`Result` and logged at `warn` via the [`log`]
//! crate; conditions that indicate a caller has broken a contract (double
//! free, a sized free with the wrong size) are unrecoverable and escalate
//! through [`error::fatal`], which logs at `error` and then panics. See
//! [`error`] for the full taxonomy.
//!
//! Call [`logger::try_init`] once at process start to install an
//! `env_logger`-backed subscriber (gated behind the `builtin_env_logger`
//! feature, on by default); embedders who already run their own `log`
//! subscriber should simply not call it.

pub mod concurrency;
pub mod error;
pub mod logger;
pub mod mem;
pub mod sync;
