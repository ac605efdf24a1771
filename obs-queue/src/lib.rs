//! # BoundedRingQueue
//!
//! Lock-free, fixed-capacity producer/consumer queue decoupling the hot
//! path (a request handler completing) from aggregation work. One queue
//! belongs to exactly one consumer; arbitrary handler threads/tasks may
//! produce into it concurrently.
//!
//! ## Design Principles
//!
//! 1. **Non-Blocking Hot Path**: `try_push` never blocks; it returns
//!    `false` when full so the caller can decide how to back off.
//! 2. **No Per-Item Allocation**: Items are moved by value into a
//!    pre-allocated slot array (`crossbeam::queue::ArrayQueue`), not boxed
//!    closures.
//! 3. **FIFO Per Producer**: Ordering across producers is unspecified and
//!    irrelevant; aggregator updates are commutative.
//!
//! ## Overflow Policy
//!
//! `push_with_backoff` retries `try_push` with a short spin-wait hint for
//! a bounded number of attempts. Past that retry ceiling the caller is
//! told the push failed and should count it as a dropped sample.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;

/// Default number of spin-wait retries before giving up on a full queue.
/// At ~1µs of useful spin-loop delay per attempt this bounds the
/// producer's worst-case stall to roughly the queue's drain latency for a
/// healthy consumer, without ever blocking.
pub const DEFAULT_RETRY_CEILING: u32 = 64;

/// A fixed-capacity, lock-free MPSC ring of `T`.
pub struct BoundedRingQueue<T> {
    inner: ArrayQueue<T>,
    dropped: AtomicU64,
    pushed: AtomicU64,
    popped: AtomicU64,
}

impl<T> BoundedRingQueue<T> {
    /// Creates a new queue with the given capacity (must be > 0).
    pub fn new(capacity: usize) -> Self {
        BoundedRingQueue {
            inner: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
        }
    }

    /// Non-blocking push. Returns `false` if the queue was full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        match self.inner.push(value) {
            Ok(()) => {
                self.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(value) => Err(value),
        }
    }

    /// Pushes with a bounded number of spin-wait retries before giving up.
    /// Returns `true` if the value was enqueued, `false` if it was
    /// dropped after exhausting the retry ceiling (the dropped counter is
    /// incremented in that case).
    pub fn push_with_backoff(&self, mut value: T, retry_ceiling: u32) -> bool {
        for _ in 0..retry_ceiling {
            match self.try_push(value) {
                Ok(()) => return true,
                Err(back) => {
                    value = back;
                    std::hint::spin_loop();
                }
            }
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Non-blocking pop. Returns `None` if the queue was empty.
    pub fn try_pop(&self) -> Option<T> {
        let popped = self.inner.pop();
        if popped.is_some() {
            self.popped.fetch_add(1, Ordering::Relaxed);
        }
        popped
    }

    /// Approximate current length (may be stale under concurrent use).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Total items ever successfully enqueued.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Total items ever successfully dequeued.
    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }

    /// Total items dropped after exhausting the retry ceiling.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
