// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Blocking FIFO used for buffer availability and for the command worker, plus a
//! counting semaphore with bounded waits.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

struct Inner<T> {
    items: VecDeque<T>,
    enabled: bool,
}

/// A FIFO whose consumers block while it is empty.
///
/// Disabling the queue wakes every blocked consumer with `None` but keeps the queued
/// items, so that a paused port does not lose buffers. [`AsyncQueue::pop_forced`]
/// bypasses the enabled flag for draining.
pub struct AsyncQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        AsyncQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                enabled: true,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().items.push_back(item);
        self.cond.notify_one();
    }

    /// Blocks until an item is available. Returns `None` once the queue is disabled.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if !inner.enabled {
                return None;
            }
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            inner = self.cond.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drops the queued items `keep` returns false for.
    pub fn retain(&self, keep: impl FnMut(&T) -> bool) {
        self.lock().items.retain(keep);
    }

    /// Pops without blocking and regardless of the enabled flag.
    pub fn pop_forced(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Removes and returns every queued item in order.
    pub fn drain(&self) -> Vec<T> {
        self.lock().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn enable(&self) {
        self.lock().enabled = true;
        self.cond.notify_all();
    }

    pub fn disable(&self) {
        self.lock().enabled = false;
        self.cond.notify_all();
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }
}

/// Counting semaphore posted from callback threads.
#[derive(Default)]
pub struct Semaphore {
    count: Mutex<u32>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.cond.notify_one();
    }

    /// Waits for one post. Returns `false` if none arrived within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut count, _) = self
            .cond
            .wait_timeout_while(count, timeout, |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Forgets stale posts, e.g. before a new port command.
    pub fn reset(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn pop_returns_items_in_order() {
        let queue = AsyncQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn disable_wakes_blocked_consumer() {
        let queue = Arc::new(AsyncQueue::<u32>::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(50));
        queue.disable();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn disabled_queue_keeps_items() {
        let queue = AsyncQueue::new();
        queue.push("a");
        queue.disable();
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_forced(), Some("a"));
        queue.push("b");
        queue.enable();
        assert_eq!(queue.pop(), Some("b"));
    }

    #[test]
    fn retain_keeps_order() {
        let queue = AsyncQueue::new();
        for item in 0..6 {
            queue.push(item);
        }
        queue.retain(|item| item % 2 == 0);
        assert_eq!(queue.drain(), [0, 2, 4]);
    }

    #[test]
    fn semaphore_counts_posts() {
        let sem = Semaphore::new();
        assert!(!sem.wait_timeout(Duration::from_millis(10)));
        sem.post();
        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(10)));
        assert!(sem.wait_timeout(Duration::from_millis(10)));
        assert!(!sem.wait_timeout(Duration::from_millis(10)));
    }
}
