//! Thread-local queue nodes.
//!
//! Every thread owns one [`QueueNode`] in thread-local storage, created on
//! first use and reused for the rest of the thread's life. The closure-scoped
//! [`QueueLock::lock_with`] and [`QueueLock::try_lock_with`] borrow it, so
//! callers never allocate or pass a node.
//!
//! The node is shared by all queue locks on the thread: holding one queue
//! lock through these APIs while taking another (or the same one) panics.
//! Pass explicit nodes to [`QueueLock::lock_then`] to hold several queue locks at
//! once.

use core::cell::Cell;

use crate::mcs::{QueueLock, QueueNode};

struct LocalNode {
    node: QueueNode,
    in_use: Cell<bool>,
}

std::thread_local! {
    static LOCAL_NODE: LocalNode = const {
        LocalNode {
            node: QueueNode::new(),
            in_use: Cell::new(false),
        }
    };
}

/// Marks the thread's node free again, also when the critical section panics.
struct Claim<'a>(&'a Cell<bool>);

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn with_local_node<R>(f: impl FnOnce(&QueueNode) -> R) -> R {
    LOCAL_NODE.with(|local| {
        if local.in_use.replace(true) {
            panic!("thread-local queue node already in use: nested lock_with on one thread");
        }
        let _claim = Claim(&local.in_use);
        f(&local.node)
    })
}

impl<T: ?Sized> QueueLock<T> {
    /// Runs `f` under the lock, queueing with the calling thread's node.
    ///
    /// # Panics
    /// Panics when called from inside another `lock_with` or `try_lock_with`
    /// closure on the same thread.
    ///
    /// ```
    /// use axiom_locks::QueueLock;
    ///
    /// let lock = QueueLock::new(0);
    /// lock.lock_with(|n| *n += 1);
    /// assert_eq!(lock.lock_with(|n| *n), 1);
    /// ```
    pub fn lock_with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        with_local_node(|node| {
            // SAFETY: the claim keeps `node` out of any other queue until the
            // guard has released it; thread-local storage does not move.
            let mut guard = unsafe { self.lock_unchecked(node) };
            f(&mut *guard)
        })
    }

    /// Runs `f` with the data if the lock was free, or with `None` otherwise.
    ///
    /// # Panics
    /// Same as [`lock_with`](Self::lock_with).
    pub fn try_lock_with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(Option<&mut T>) -> R,
    {
        with_local_node(|node| {
            // SAFETY: as in `lock_with`.
            match unsafe { self.try_lock_unchecked(node) } {
                Some(mut guard) => f(Some(&mut *guard)),
                None => f(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn counts_across_threads() {
        const THREADS: usize = 4;
        const ITERS: usize = 2_000;

        let lock = Arc::new(QueueLock::new(0usize));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        lock.lock_with(|n| *n += 1);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(lock.lock_with(|n| *n), THREADS * ITERS);
    }

    #[test]
    fn try_lock_with_sees_holder() {
        let lock = QueueLock::new(5);
        let mut node = QueueNode::new();

        lock.lock_then(&mut node, |_| {
            assert_eq!(lock.try_lock_with(|v| v.copied()), None);
        });

        assert_eq!(lock.try_lock_with(|v| v.copied()), Some(5));
    }

    #[test]
    fn nested_use_panics_and_recovers() {
        let outer = QueueLock::new(());
        let inner = QueueLock::new(());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            outer.lock_with(|_| inner.lock_with(|_| ()));
        }));
        assert!(result.is_err());

        // The unwinding released `outer` and freed the thread's node.
        assert!(!outer.is_locked());
        assert!(!inner.is_locked());
        inner.lock_with(|_| ());
    }
}
