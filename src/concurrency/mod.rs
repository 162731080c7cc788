//! Double-buffered background execution: a single worker ([`Worker`]) or
//! a fixed-size pool of interchangeable workers ([`WorkerGroup`]) that
//! drain a lock-minimal producer/consumer handoff on [`flush`].
//!
//! Both types share the same contract: producers `push` tasks, a `flush`
//! call hands the filled buffer to the consumer side and wakes it, and
//! `wait` blocks the caller until that batch has fully executed. Neither
//! type catches panics from tasks; a task that must report failure should
//! do so through its own captured channel.
//!
//! [`flush`]: Worker::flush

mod worker;
mod worker_group;

pub use worker::{Task, Worker};
pub use worker_group::WorkerGroup;
