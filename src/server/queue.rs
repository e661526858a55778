//! Bounded multi-producer, single-consumer FIFO with explicit close.
//!
//! Producers block while the queue is full, so a slow socket slows the frame
//! collectors feeding it instead of dropping frames. Closing wakes everyone:
//! consumers drain what is left and then see `None`, producers get
//! [`QueueError::Closed`].

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use thiserror::Error;

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("timed out waiting for queue space")]
    Timeout,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

#[derive(Debug)]
pub struct SafeQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> Default for SafeQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T> SafeQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);

        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until there is room for `item`.
    pub fn push(&self, item: T) -> Result<(), QueueError> {
        self.push_batch(vec![item])
    }

    /// Enqueues `items` contiguously: no other producer's item lands between
    /// them. A batch larger than the capacity waits for an empty queue.
    pub fn push_batch(&self, items: Vec<T>) -> Result<(), QueueError> {
        self.push_until(items, None).map_err(|(e, _)| e)
    }

    /// Like [`SafeQueue::push_batch`], but gives up after `timeout` and hands
    /// the items back so the caller can retry.
    pub fn push_batch_timeout(
        &self,
        items: Vec<T>,
        timeout: Duration,
    ) -> Result<(), (QueueError, Vec<T>)> {
        self.push_until(items, Some(Instant::now() + timeout))
    }

    /// Like [`SafeQueue::push`], but gives up after `timeout`.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), QueueError> {
        self.push_batch_timeout(vec![item], timeout)
            .map_err(|(e, _)| e)
    }

    fn push_until(
        &self,
        items: Vec<T>,
        deadline: Option<Instant>,
    ) -> Result<(), (QueueError, Vec<T>)> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return Err((QueueError::Closed, items));
            }
            if self.fits(&inner, items.len()) {
                break;
            }
            inner = match deadline {
                None => self
                    .not_full
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err((QueueError::Timeout, items));
                    }
                    self.not_full
                        .wait_timeout(inner, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }

        inner.items.extend(items);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available. Returns `None` once the queue is
    /// closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_all();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_all();
        }
        item
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fits(&self, inner: &Inner<T>, n: usize) -> bool {
        inner.items.is_empty() || inner.items.len() + n <= self.capacity
    }
}
