//! Atomics and spin hints used by the locks.
//!
//! Regular builds use `core` atomics. The crate's own tests built with
//! `--cfg loom` swap in loom's model-checked types so the lock protocols can
//! be explored exhaustively; every other build under `--cfg loom` (doctests,
//! the demo binary, dependents) keeps the `core` types.

#[cfg(not(all(loom, test)))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

#[cfg(all(loom, test))]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Busy-wait hint for the processor.
#[cfg(not(all(loom, test)))]
#[inline(always)]
pub(crate) fn spin_loop() {
    core::hint::spin_loop();
}

/// Under loom a spin must give the scheduler a chance to run someone else.
#[cfg(all(loom, test))]
#[inline]
pub(crate) fn spin_loop() {
    loom::hint::spin_loop();
}

/// OS-level yield, only reachable with `std`.
#[cfg(all(feature = "std", not(all(loom, test))))]
#[inline]
pub(crate) fn yield_now() {
    std::thread::yield_now();
}
