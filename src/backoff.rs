//! # CpuBackoff
//!
//! The shared `cpu_backoff` utility used by the contended path of
//! [`RawSpinLock`](crate::RawSpinLock).
//!
//! Every failed attempt calls [`CpuBackoff::pause`], which issues a run of CPU
//! pause hints ([`core::hint::spin_loop`]) and then doubles the length of the
//! next run, up to a cap. Backing off keeps the waiting cores off the lock's
//! cache line long enough for the holder to finish its critical section.
//!
//! ## Behavior
//! - The first pause spins [`START_SPINS`] times; each pause doubles the count
//!   until it reaches [`MAX_SPINS`].
//! - With the `std` feature, a pause whose spin count is above
//!   [`YIELD_THRESHOLD`] also calls `std::thread::yield_now`, handing the
//!   core back to the OS scheduler under prolonged contention.
//! - [`CpuBackoff::relax`] halves the count, [`CpuBackoff::reset`] restarts it.
//!
//! ## Example
//! ```rust
//! use core::sync::atomic::{AtomicBool, Ordering};
//! use axiom_locks::CpuBackoff;
//!
//! let flag = AtomicBool::new(false);
//! let backoff = CpuBackoff::new();
//!
//! while flag.swap(true, Ordering::Acquire) {
//!     backoff.pause();
//! }
//! assert_eq!(backoff.current(), CpuBackoff::new().current());
//! ```

use core::cell::Cell;

use crate::sync;

/// Spin count of the first pause.
pub const START_SPINS: u32 = 1 << 5;

/// Upper bound on the spin count of a single pause.
pub const MAX_SPINS: u32 = 1 << 22;

/// Spin count past which a pause also yields to the OS scheduler.
pub const YIELD_THRESHOLD: u32 = 1 << 10;

/// Exponential pause strategy for a single contended wait.
///
/// A `CpuBackoff` is meant to live on the stack of the waiting call, one per
/// acquisition attempt. It uses [`Cell`] internally and is therefore not
/// `Sync`.
#[derive(Debug)]
pub struct CpuBackoff {
    spins: Cell<u32>,
    start: u32,
    cap: u32,
}

impl CpuBackoff {
    /// Creates a backoff with the default limits.
    #[inline(always)]
    pub const fn new() -> Self {
        Self::with_limits(START_SPINS, MAX_SPINS)
    }

    /// Creates a backoff that starts at `start` spins and never pauses for
    /// more than `cap` spins.
    ///
    /// Both values are clamped to at least one spin, and `start` is clamped to
    /// `cap`.
    ///
    /// ```
    /// use axiom_locks::CpuBackoff;
    ///
    /// let b = CpuBackoff::with_limits(4, 16);
    /// b.pause();
    /// b.pause();
    /// b.pause();
    /// assert_eq!(b.current(), 16);
    /// assert!(b.is_saturated());
    /// ```
    #[inline(always)]
    pub const fn with_limits(start: u32, cap: u32) -> Self {
        let cap = if cap == 0 { 1 } else { cap };
        let start = if start == 0 {
            1
        } else if start > cap {
            cap
        } else {
            start
        };
        Self {
            spins: Cell::new(start),
            start,
            cap,
        }
    }

    /// Pauses the calling thread for the current spin count, then doubles it.
    #[inline]
    pub fn pause(&self) {
        self.pause_yielded();
    }

    /// [`pause`](Self::pause), reporting whether the pause also yielded to
    /// the OS scheduler.
    pub(crate) fn pause_yielded(&self) -> bool {
        let spins = self.spins.get();

        #[cfg(not(all(loom, test)))]
        for _ in 0..spins {
            sync::spin_loop();
        }

        // One hint is a full scheduling point under loom; looping would only
        // grow the explored state space.
        #[cfg(all(loom, test))]
        sync::spin_loop();

        self.spins.set(spins.saturating_mul(2).min(self.cap));

        #[cfg(all(feature = "std", not(all(loom, test))))]
        if spins > YIELD_THRESHOLD {
            if spins >> 1 <= YIELD_THRESHOLD {
                log::trace!("backoff reached {spins} spins, yielding to the scheduler");
            }
            sync::yield_now();
            return true;
        }

        false
    }

    /// Halves the spin count of the next pause, never going below one spin.
    #[inline(always)]
    pub fn relax(&self) {
        self.spins.set((self.spins.get() >> 1).max(1));
    }

    /// Returns the spin count the next pause will use.
    #[inline(always)]
    pub fn current(&self) -> u32 {
        self.spins.get()
    }

    /// Returns `true` once the spin count has reached its cap.
    #[inline(always)]
    pub fn is_saturated(&self) -> bool {
        self.spins.get() >= self.cap
    }

    /// Restarts the backoff from its starting spin count.
    #[inline(always)]
    pub fn reset(&self) {
        self.spins.set(self.start);
    }
}

impl Default for CpuBackoff {
    fn default() -> Self {
        Self::new()
    }
}
