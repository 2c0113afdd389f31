//! # Backoff spin lock
//!
//! A single shared flag claimed by atomic test-and-set. Contended acquirers
//! back off with a [`CpuBackoff`] between attempts.
//!
//! [`RawSpinLock`] exposes the bare acquire/release pair and implements
//! [`lock_api::RawMutex`], so [`SpinLock<T>`] is a regular
//! [`lock_api::Mutex`] whose guard releases on every exit path.
//!
//! ## Safety
//! - The lock is **not fair**: a waiter may be overtaken indefinitely under
//!   sustained contention.
//! - The lock is **not reentrant**: acquiring it twice on one thread spins
//!   forever.
//! - Keep critical sections short and never block while holding it.
//!
//! ## Example
//! ```rust
//! use axiom_locks::SpinLock;
//!
//! static RECORDS: SpinLock<u64> = SpinLock::new(0);
//!
//! fn record_batch(n: u64) {
//!     *RECORDS.lock() += n;
//! }
//!
//! record_batch(3);
//! record_batch(4);
//! assert_eq!(*RECORDS.lock(), 7);
//! ```

#[cfg(not(all(loom, test)))]
use lock_api::{GuardSend, RawMutex};

use crate::sync::{AtomicBool, Ordering::Acquire, Ordering::Relaxed, Ordering::Release};
use crate::CpuBackoff;

/// A spin lock protecting a value of type `T`.
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

/// RAII guard returned by [`SpinLock::lock`]; releases the lock on drop.
pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;

/// Test-and-set lock flag with exponential backoff.
///
/// `true` means held, `false` means free. The flag sits on its own cache line
/// so that waiters hammering it do not slow down neighbouring data.
#[derive(Debug)]
#[repr(align(64))]
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    /// Creates an unlocked flag.
    #[cfg(not(all(loom, test)))]
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Creates an unlocked flag.
    #[cfg(all(loom, test))]
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Blocks until the flag is claimed by the calling thread.
    #[inline]
    pub fn acquire(&self) {
        if self.try_acquire() {
            return;
        }
        self.acquire_contended();
    }

    /// Waits on plain loads while the flag is held and only retries the
    /// test-and-set once it reads free.
    #[cold]
    fn acquire_contended(&self) {
        let backoff = CpuBackoff::new();
        loop {
            while self.locked.load(Relaxed) {
                backoff.pause();
            }
            if !self.locked.swap(true, Acquire) {
                return;
            }
        }
    }

    /// Releases the flag, publishing the critical section's writes to the
    /// next acquirer.
    ///
    /// # Safety
    /// The calling context must hold the lock. Releasing a lock held by
    /// somebody else lets two threads into the critical section.
    #[inline]
    pub unsafe fn release(&self) {
        self.locked.store(false, Release);
    }

    /// Makes a single test-and-set attempt.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        !self.locked.swap(true, Acquire)
    }

    /// Retries with backoff for at most `attempts` test-and-set attempts.
    ///
    /// This is the building block for callers that need bounded waiting.
    ///
    /// ```
    /// use axiom_locks::RawSpinLock;
    ///
    /// let lock = RawSpinLock::new();
    /// lock.acquire();
    /// assert!(!lock.try_acquire_for(4));
    /// unsafe { lock.release() };
    /// assert!(lock.try_acquire_for(4));
    /// ```
    pub fn try_acquire_for(&self, attempts: usize) -> bool {
        let backoff = CpuBackoff::new();
        for _ in 0..attempts {
            if self.try_acquire() {
                return true;
            }
            backoff.pause();
        }
        false
    }

    /// Returns whether the flag is currently held. The answer may be stale by
    /// the time it is read.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }
}

#[cfg(not(all(loom, test)))]
impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(all(loom, test)))]
unsafe impl RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    type GuardMarker = GuardSend;

    #[inline]
    fn lock(&self) {
        self.acquire();
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.try_acquire()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.release();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        RawSpinLock::is_locked(self)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let lock = SpinLock::new(10);

        {
            let mut guard = lock.lock();
            *guard += 5;
            assert_eq!(*guard, 15);
            assert!(lock.is_locked());
        }

        assert!(!lock.is_locked(), "lock should be free after the guard drops");
        assert_eq!(lock.into_inner(), 15);
    }

    #[test]
    fn raw_acquire_release_cycle() {
        let lock = RawSpinLock::new();
        for _ in 0..1_000 {
            lock.acquire();
            assert!(lock.is_locked());
            assert!(!lock.try_acquire());
            unsafe { lock.release() };
            assert!(!lock.is_locked());
        }
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(42);

        let guard = lock.lock();
        assert!(lock.try_lock().is_none());

        drop(guard);
        assert_eq!(lock.try_lock().map(|g| *g), Some(42));
    }

    #[test]
    fn mutual_exclusion() {
        const THREADS: usize = 8;
        const ITERS: usize = 10_000;

        let lock = Arc::new(SpinLock::new(0usize));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        let mut guard = lock.lock();
                        let seen = inside.fetch_add(1, Ordering::Relaxed);
                        assert_eq!(seen, 0, "two threads inside the critical section");
                        *guard += 1;
                        inside.fetch_sub(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.lock(), THREADS * ITERS);
    }

    #[test]
    fn bounded_contention_completes() {
        const THREADS: usize = 4;
        const ITERS: usize = 1_000;

        let lock = Arc::new(RawSpinLock::new());
        let done = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(Barrier::new(THREADS));
        let began = Instant::now();

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let done = Arc::clone(&done);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    for _ in 0..ITERS {
                        lock.acquire();
                        unsafe { lock.release() };
                    }
                    done.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(done.load(Ordering::Relaxed), THREADS);
        assert!(
            began.elapsed() < Duration::from_secs(30),
            "contended threads took {:?}",
            began.elapsed()
        );
    }
}
