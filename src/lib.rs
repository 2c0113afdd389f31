//! # axiom-locks
//!
//! Busy-waiting mutual exclusion for worker threads that share small pieces of
//! in-memory state: pipeline counters, free lists, output cursors.
//!
//! The crate provides two independent locks and the backoff they share:
//!
//! - [`SpinLock<T>`] / [`RawSpinLock`]: a test-and-set flag with exponential
//!   backoff. Smallest footprint, no fairness. For very short critical
//!   sections under low to moderate contention.
//! - [`QueueLock<T>`] / [`RawQueueLock`]: an MCS queue lock. Waiters line up
//!   behind an atomic tail pointer and each spins on its own [`QueueNode`],
//!   so acquisition is FIFO and waiters do not fight over one cache line.
//! - [`CpuBackoff`]: the exponential pause used by contended spin-lock
//!   acquirers.
//!
//! Neither lock parks threads, supports timeouts, or detects deadlock. Both
//! are non-reentrant, and each acquisition must be released exactly once.
//!
//! ## Quick example
//!
//! ```rust
//! use axiom_locks::{QueueLock, QueueNode, SpinLock};
//!
//! let hits = SpinLock::new(0u64);
//! *hits.lock() += 1;
//! assert_eq!(*hits.lock(), 1);
//!
//! let cursor = QueueLock::new(0usize);
//! let mut node = QueueNode::new();
//! cursor.lock_then(&mut node, |c| *c += 64);
//! assert_eq!(cursor.lock_then(&mut node, |c| *c), 64);
//! ```
//!
//! ## Feature flags
//!
//! - **`std`** (default): backoff escalates to `std::thread::yield_now` under
//!   prolonged contention, and `QueueLock::lock_with` keeps a queue node in
//!   thread-local storage. Without it the crate is `no_std`.
//!
//! ## Model checking
//!
//! `RUSTFLAGS="--cfg loom" cargo test --release` runs the crate's unit tests
//! against [loom](https://docs.rs/loom)'s atomics and model-checks both
//! locks. Outside the crate's own test build `--cfg loom` changes nothing.

#![cfg_attr(not(any(feature = "std", loom, test)), no_std)]

pub mod backoff;
pub mod mcs;
pub mod spinlock;

#[cfg(all(feature = "std", not(all(loom, test))))]
mod local;
mod sync;


pub use backoff::CpuBackoff;
pub use mcs::{QueueLock, QueueNode, RawQueueLock};
pub use spinlock::{RawSpinLock, SpinLock, SpinLockGuard};
