//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Thread-safe FIFO used to stage frames between producers and one consumer."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Returned by [`FrameQueue::push`] when a bounded queue is at capacity.
///
/// Hands the rejected item back so the caller decides whether to drop it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("frame queue is full")]
pub struct QueueFull<T>(pub T);

/// Thread-safe FIFO of owned items.
///
/// Any number of threads may push; popping transfers ownership of the item
/// to the caller. The queue is unbounded unless created with
/// [`FrameQueue::bounded`].
#[derive(Debug)]
pub struct FrameQueue<T = Vec<u8>> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
    capacity: Option<usize>,
}

impl<T> FrameQueue<T> {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            capacity: None,
        }
    }

    /// Queue that rejects pushes once `capacity` items are waiting.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity: Some(capacity),
        }
    }

    /// Append `item` and wake one waiting consumer.
    pub fn push(&self, item: T) -> Result<(), QueueFull<T>> {
        let mut items = self.items.lock();
        if let Some(capacity) = self.capacity {
            if items.len() >= capacity {
                return Err(QueueFull(item));
            }
        }
        items.push_back(item);
        drop(items);
        self.ready.notify_one();
        Ok(())
    }

    /// Remove the oldest item without waiting.
    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Remove the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.ready.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    /// Number of waiting items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop every waiting item, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let discarded = items.len();
        items.clear();
        discarded
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
