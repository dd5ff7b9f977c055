//! Work distribution: contiguous batch partitioning for collection and a
//! lock-free claim queue for downloads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Split `items` into at most `workers` contiguous batches of
/// `ceil(len / workers)` items each.
///
/// The last batch may be shorter. Returns no batches for empty input.
pub fn partition_batches<T: Clone>(items: &[T], workers: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let size = items.len().div_ceil(workers.max(1));
    items.chunks(size).map(<[T]>::to_vec).collect()
}

/// Lock-free queue handing tasks to pool workers.
///
/// Workers call [`next()`](TaskQueue::next) to atomically claim the next
/// task. Once [`close()`](TaskQueue::close) is called no further task is
/// handed out, which is how a pool stops accepting submissions on shutdown.
pub struct TaskQueue<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
    closed: AtomicBool,
}

impl<T> TaskQueue<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Claim the next task, or `None` when drained or closed
    pub fn next(&self) -> Option<&T> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    /// Stop handing out tasks; already-claimed tasks are unaffected
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Total tasks in queue
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Tasks never claimed (for reporting after a close)
    pub fn unclaimed(&self) -> usize {
        self.items
            .len()
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }
}
