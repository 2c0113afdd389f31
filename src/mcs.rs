//! # MCS queue lock
//!
//! A fair lock built from a single atomic `tail` pointer and one reusable
//! [`QueueNode`] per waiting thread. Acquirers append their node to the queue
//! with one atomic exchange and then spin on their *own* node's `ready` flag,
//! so waiters never contend on a shared cache line. The lock is handed over in
//! strict arrival order.
//!
//! Nodes are passed explicitly: [`QueueLock::lock_then`] borrows the caller's
//! node mutably for the whole critical section, which is a closure, so
//! reusing a node while it is still queued is a compile error and no guard
//! can escape the borrow. With the `std` feature, `QueueLock::lock_with`
//! uses a node kept in thread-local storage instead.
//!
//! ## Protocol
//!
//! Acquire resets the node, exchanges it into `tail` and, when there was a
//! predecessor, links itself behind it and waits for `ready`. Release either
//! swings `tail` back to null (no successor) or sets the successor's `ready`.
//! Between a successor's exchange and its link the releaser sees no `next`
//! yet the CAS on `tail` fails; it then waits for the link, which the
//! successor is already committed to storing.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//!
//! use axiom_locks::{QueueLock, QueueNode};
//!
//! let lock = Arc::new(QueueLock::new(Vec::new()));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|id| {
//!         let lock = Arc::clone(&lock);
//!         thread::spawn(move || {
//!             // One node per worker, reused for every acquisition.
//!             let mut node = QueueNode::new();
//!             for _ in 0..10 {
//!                 lock.lock_then(&mut node, |ids| ids.push(id));
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//!
//! let mut node = QueueNode::new();
//! assert_eq!(lock.lock_then(&mut node, |ids| ids.len()), 40);
//! ```

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr;

use crate::sync::{
    self, AtomicBool, AtomicPtr,
    Ordering::{AcqRel, Acquire, Relaxed, Release},
};

/// A waiter's slot in the queue.
///
/// A node belongs to one thread and is reused for every acquisition that
/// thread makes. Both fields are written by other threads while the node is
/// queued: the successor links itself into `next` and the predecessor sets
/// `ready`. The node is cache-line aligned so that the `ready` spin stays
/// local to its owner.
#[derive(Debug)]
#[repr(align(64))]
pub struct QueueNode {
    next: AtomicPtr<QueueNode>,
    ready: AtomicBool,
}

impl QueueNode {
    /// Creates a detached node.
    #[cfg(not(all(loom, test)))]
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            ready: AtomicBool::new(false),
        }
    }

    /// Creates a detached node.
    #[cfg(all(loom, test))]
    pub fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            ready: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    fn as_ptr(&self) -> *mut QueueNode {
        self as *const QueueNode as *mut QueueNode
    }

    /// Clears state left over from the previous acquisition. Published by the
    /// release half of the exchange that enqueues the node.
    #[inline(always)]
    fn reset(&self) {
        self.next.store(ptr::null_mut(), Relaxed);
        self.ready.store(false, Relaxed);
    }
}

#[cfg(not(all(loom, test)))]
impl Default for QueueNode {
    fn default() -> Self {
        Self::new()
    }
}

/// How a release left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handoff {
    /// No successor; `tail` is null again.
    Freed,
    /// A linked successor was signalled.
    Successor,
    /// A successor had enqueued but not linked yet; the releaser waited for
    /// the link before signalling it.
    AfterRaceWindow,
}

/// The bare MCS acquire/release protocol over a `tail` pointer.
///
/// `tail` is null exactly when nobody holds or waits for the lock.
#[derive(Debug)]
pub struct RawQueueLock {
    tail: AtomicPtr<QueueNode>,
}

impl RawQueueLock {
    /// Creates an unlocked queue.
    #[cfg(not(all(loom, test)))]
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Creates an unlocked queue.
    #[cfg(all(loom, test))]
    pub fn new() -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Enqueues `node` and blocks until it reaches the head of the queue.
    ///
    /// # Safety
    /// - `node` must not be queued on any lock, i.e. every earlier acquisition
    ///   with it has been released.
    /// - `node` must stay alive and must not move until the matching
    ///   [`release`](Self::release) returns.
    pub unsafe fn acquire(&self, node: &QueueNode) {
        node.reset();

        // Release publishes the reset before the node becomes reachable;
        // acquire pairs with the CAS that emptied the queue, if that is the
        // tail we read.
        let pred = self.tail.swap(node.as_ptr(), AcqRel);

        if !pred.is_null() {
            #[cfg(all(test, not(loom)))]
            link_gate::before_link();

            // SAFETY: `pred` cannot finish its release, and so cannot be
            // reused or freed, until it observes this link.
            unsafe { (*pred).next.store(node.as_ptr(), Release) };

            while !node.ready.load(Relaxed) {
                sync::spin_loop();
            }
        }

        // Synchronizes with the predecessor's hand-off store.
        let _ = node.ready.load(Acquire);
    }

    /// Takes the lock only if the queue is empty.
    ///
    /// # Safety
    /// Same requirements as [`acquire`](Self::acquire). On `false` the node
    /// was never enqueued and is free again immediately.
    pub unsafe fn try_acquire(&self, node: &QueueNode) -> bool {
        node.reset();
        self.tail
            .compare_exchange(ptr::null_mut(), node.as_ptr(), AcqRel, Relaxed)
            .is_ok()
    }

    /// Hands the lock to the next queued node, or empties the queue.
    ///
    /// # Safety
    /// `node` must be the node of the current holder, passed to the
    /// `acquire` (or successful `try_acquire`) this call pairs with. Each
    /// acquisition is released exactly once.
    #[inline]
    pub unsafe fn release(&self, node: &QueueNode) {
        unsafe { self.handoff(node) };
    }

    pub(crate) unsafe fn handoff(&self, node: &QueueNode) -> Handoff {
        let mut next = node.next.load(Acquire);
        let mut outcome = Handoff::Successor;

        if next.is_null() {
            if self
                .tail
                .compare_exchange(node.as_ptr(), ptr::null_mut(), Release, Relaxed)
                .is_ok()
            {
                return Handoff::Freed;
            }

            // A successor already swapped itself into `tail` and its next
            // store is our `next`. Bounded by that single store.
            loop {
                next = node.next.load(Acquire);
                if !next.is_null() {
                    break;
                }
                sync::spin_loop();
            }
            log::trace!("queue lock release waited for successor link");
            outcome = Handoff::AfterRaceWindow;
        }

        // SAFETY: the successor spins on `ready` and keeps its node alive
        // until it sees this store; we do not touch it afterwards.
        unsafe { (*next).ready.store(true, Release) };
        outcome
    }

    /// Returns whether some thread holds or waits for the lock. The answer
    /// may be stale by the time it is read.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        !self.tail.load(Relaxed).is_null()
    }
}

#[cfg(not(all(loom, test)))]
impl Default for RawQueueLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A fair MCS lock protecting a value of type `T`.
pub struct QueueLock<T: ?Sized> {
    raw: RawQueueLock,
    data: UnsafeCell<T>,
}

// SAFETY: the queue protocol grants exclusive access to one holder at a time.
unsafe impl<T: ?Sized + Send> Send for QueueLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for QueueLock<T> {}

impl<T> QueueLock<T> {
    /// Creates an unlocked queue lock around `value`.
    #[cfg(not(all(loom, test)))]
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawQueueLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Creates an unlocked queue lock around `value`.
    #[cfg(all(loom, test))]
    pub fn new(value: T) -> Self {
        Self {
            raw: RawQueueLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the lock and returns the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> QueueLock<T> {
    /// Waits in line with `node` and runs `f` with exclusive access to the
    /// data. The lock is handed on when `f` returns or unwinds.
    ///
    /// The critical section is a closure so that no guard can outlive the
    /// borrow of `node`: a leaked guard would leave `tail` pointing at a node
    /// the caller is free to drop.
    ///
    /// ```
    /// use axiom_locks::{QueueLock, QueueNode};
    ///
    /// let lock = QueueLock::new(0);
    /// let mut node = QueueNode::new();
    /// lock.lock_then(&mut node, |n| *n += 2);
    /// assert_eq!(lock.lock_then(&mut node, |n| *n), 2);
    /// ```
    pub fn lock_then<F, R>(&self, node: &mut QueueNode, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        // SAFETY: the exclusive borrow keeps `node` out of any other queue and
        // pinned until the guard, which never leaves this frame, releases it.
        let mut guard = unsafe { self.lock_unchecked(node) };
        f(&mut *guard)
    }

    /// Takes the lock with `node` only if nobody holds or waits for it, and
    /// runs `f` with the data, or with `None` when the lock was busy.
    ///
    /// ```
    /// use axiom_locks::{QueueLock, QueueNode};
    ///
    /// let lock = QueueLock::new(1);
    /// let mut first = QueueNode::new();
    /// let mut second = QueueNode::new();
    ///
    /// lock.lock_then(&mut first, |_| {
    ///     assert!(lock.try_lock_then(&mut second, |v| v.is_none()));
    /// });
    /// assert_eq!(lock.try_lock_then(&mut second, |v| v.copied()), Some(1));
    /// ```
    pub fn try_lock_then<F, R>(&self, node: &mut QueueNode, f: F) -> R
    where
        F: FnOnce(Option<&mut T>) -> R,
    {
        // SAFETY: as in `lock_then`.
        match unsafe { self.try_lock_unchecked(node) } {
            Some(mut guard) => f(Some(&mut *guard)),
            None => f(None),
        }
    }

    /// Returns whether some thread holds or waits for the lock.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// # Safety
    /// `node` must satisfy the requirements of [`RawQueueLock::acquire`] for
    /// as long as the returned guard lives.
    pub(crate) unsafe fn lock_unchecked<'a>(&'a self, node: &'a QueueNode) -> QueueGuard<'a, T> {
        unsafe { self.raw.acquire(node) };
        QueueGuard {
            lock: self,
            node,
            marker: PhantomData,
        }
    }

    /// # Safety
    /// As for [`lock_unchecked`](Self::lock_unchecked).
    pub(crate) unsafe fn try_lock_unchecked<'a>(
        &'a self,
        node: &'a QueueNode,
    ) -> Option<QueueGuard<'a, T>> {
        if unsafe { self.raw.try_acquire(node) } {
            Some(QueueGuard {
                lock: self,
                node,
                marker: PhantomData,
            })
        } else {
            None
        }
    }
}

impl<T: Default> Default for QueueLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for QueueLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Holds a [`QueueLock`] for the length of a closure; hands the lock on
/// when dropped, including during unwinding.
#[must_use = "if unused the QueueLock will immediately unlock"]
pub(crate) struct QueueGuard<'a, T: ?Sized> {
    lock: &'a QueueLock<T>,
    node: &'a QueueNode,
    marker: PhantomData<&'a mut T>,
}

impl<T: ?Sized> Deref for QueueGuard<'_, T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        // SAFETY: the guard is the only holder.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for QueueGuard<'_, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard is the only holder.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for QueueGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `node` acquired the lock and is released exactly once here.
        unsafe { self.lock.raw.release(self.node) };
    }
}

/// Delay point between the tail exchange and the predecessor link, used to
/// hold a successor inside the release race window.
#[cfg(all(test, not(loom)))]
pub(crate) mod link_gate {
    use std::cell::Cell;
    use std::sync::atomic::{AtomicBool, Ordering};

    std::thread_local! {
        static LINK_GATE: Cell<Option<&'static AtomicBool>> = const { Cell::new(None) };
    }

    /// Makes the calling thread's next enqueue wait for `gate` before linking.
    pub(crate) fn hold_link_until(gate: &'static AtomicBool) {
        LINK_GATE.with(|g| g.set(Some(gate)));
    }

    pub(crate) fn before_link() {
        if let Some(gate) = LINK_GATE.with(|g| g.take()) {
            while !gate.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
        }
    }
}
