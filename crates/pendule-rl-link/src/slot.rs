//! Conflating single-slot mailbox between the reader thread and the plant
//!
//! New publications overwrite an unread value, so a reader always gets the
//! freshest sample and at most one value is pending.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use pendule_rl_core::{PlantError, Result};

#[derive(Debug)]
struct SlotInner<T> {
    pending: Option<T>,
    closed: bool,
}

/// Single-value mailbox with blocking and non-blocking takes
#[derive(Debug)]
pub struct StateSlot<T> {
    inner: Mutex<SlotInner<T>>,
    ready: Condvar,
    /// Counter for values published
    published_count: AtomicUsize,
    /// Counter for values overwritten before being taken
    dropped_count: AtomicUsize,
}

impl<T> Default for StateSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StateSlot<T> {
    /// Create an empty open slot
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                pending: None,
                closed: false,
            }),
            ready: Condvar::new(),
            published_count: AtomicUsize::new(0),
            dropped_count: AtomicUsize::new(0),
        }
    }

    /// Publish a value, overwriting any pending one
    ///
    /// Returns true if a pending value was dropped. Publishing into a closed
    /// slot is a no-op.
    pub fn publish(&self, value: T) -> bool {
        let mut guard = self.inner.lock();
        if guard.closed {
            return false;
        }
        let was_pending = guard.pending.replace(value).is_some();
        if was_pending {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
        }
        self.published_count.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_all();
        was_pending
    }

    /// Take the pending value without waiting
    pub fn try_take(&self) -> Result<Option<T>> {
        let mut guard = self.inner.lock();
        if guard.closed {
            return Err(PlantError::Closed);
        }
        Ok(guard.pending.take())
    }

    /// Wait until a value is available and take it
    pub fn take_blocking(&self) -> Result<T> {
        let mut guard = self.inner.lock();
        loop {
            if guard.closed {
                return Err(PlantError::Closed);
            }
            if let Some(value) = guard.pending.take() {
                return Ok(value);
            }
            self.ready.wait(&mut guard);
        }
    }

    /// Wait up to `timeout` for a value without taking it
    pub fn wait_available(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock();
        loop {
            if guard.closed {
                return Err(PlantError::Closed);
            }
            if guard.pending.is_some() {
                return Ok(true);
            }
            if self.ready.wait_until(&mut guard, deadline).timed_out() {
                return Ok(guard.pending.is_some() && !guard.closed);
            }
        }
    }

    /// Close the slot, waking every waiter
    pub fn close(&self) {
        let mut guard = self.inner.lock();
        guard.closed = true;
        guard.pending = None;
        self.ready.notify_all();
    }

    /// Whether [`close`](Self::close) was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Statistics: (published, dropped)
    #[must_use]
    pub fn stats(&self) -> (usize, usize) {
        (
            self.published_count.load(Ordering::Relaxed),
            self.dropped_count.load(Ordering::Relaxed),
        )
    }
}
