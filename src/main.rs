//! Demo: worker threads of a toy pipeline sharing state under both locks.
//!
//! Each worker "processes" batches of records. The total record count is kept
//! under a `SpinLock<u64>`; the ordered log of finished batch ids is kept
//! under a `QueueLock<Vec<_>>`, once with an explicit node and once through
//! the thread-local node.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use axiom_locks::{QueueLock, QueueNode, SpinLock};

const WORKERS: usize = 16;
const BATCHES: usize = 50_000;
const RECORDS_PER_BATCH: u64 = 8;

// Shared static spinlock protecting the running record total.
static RECORDS: SpinLock<u64> = SpinLock::new(0);

fn main() {
    let finished = Arc::new(QueueLock::new(Vec::with_capacity(WORKERS * BATCHES)));
    let started = Instant::now();

    let mut workers = Vec::with_capacity(WORKERS);
    for worker in 0..WORKERS {
        let finished = Arc::clone(&finished);
        workers.push(thread::spawn(move || {
            let mut node = QueueNode::new();
            for batch in 0..BATCHES {
                *RECORDS.lock() += RECORDS_PER_BATCH;

                if batch % 2 == 0 {
                    finished.lock_then(&mut node, |done| done.push((worker, batch)));
                } else {
                    finished.lock_with(|done| done.push((worker, batch)));
                }
            }
        }));
    }

    for w in workers {
        let _ = w.join();
    }

    let elapsed = started.elapsed();
    let batches = finished.lock_with(|done| done.len());

    println!("workers:  {WORKERS}");
    println!("records:  {}", *RECORDS.lock());
    println!("batches:  {batches}");
    println!("elapsed:  {elapsed:?}");
}
