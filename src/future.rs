//! One-shot settable cell: the reply side of a request.
//!
//! A [`OneShot`] starts unset, is satisfied at most once, and hands the value
//! to every waiter. It is the synchronisation point between a handler calling
//! `reply()` and a caller blocked in `ask_blocking()`.
//!
//! # States
//!
//! ```text
//! Unset ──satisfy(v)──► Set(v)     (terminal; later satisfies are ignored)
//! ```
//!
//! Waiters block on a condvar; `satisfy` wakes them all. Values are `Clone`
//! so that any number of `get()` calls can observe the same result.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A single-assignment cell with blocking and timed retrieval.
///
/// The first `satisfy` wins; every later call is a silent no-op. This is what
/// makes a late `reply()` after an `ask_timeout` harmless.
pub struct OneShot<T> {
    cell: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> OneShot<T> {
    /// Create an unset cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Set the value and wake all waiters.
    ///
    /// If the cell is already set, the new value is dropped and no waiter is
    /// disturbed.
    pub fn satisfy(&self, value: T) {
        let mut cell = self.cell.lock();
        if cell.is_none() {
            *cell = Some(value);
            drop(cell);
            self.ready.notify_all();
        }
    }

    /// Block until the cell is set, then return the value.
    pub fn get(&self) -> T {
        let mut cell = self.cell.lock();
        loop {
            if let Some(value) = cell.as_ref() {
                return value.clone();
            }
            self.ready.wait(&mut cell);
        }
    }

    /// Wait up to `timeout` for the cell to be set.
    ///
    /// Returns `None` if the deadline passes first. The cell may still be
    /// satisfied later; a timed-out waiter simply stops observing it.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut cell = self.cell.lock();
        loop {
            if let Some(value) = cell.as_ref() {
                return Some(value.clone());
            }
            if self.ready.wait_until(&mut cell, deadline).timed_out() {
                return cell.as_ref().cloned();
            }
        }
    }

    /// Non-blocking read of the current value, if any.
    pub fn try_get(&self) -> Option<T> {
        self.cell.lock().as_ref().cloned()
    }

    /// Whether the cell has been set.
    pub fn is_satisfied(&self) -> bool {
        self.cell.lock().is_some()
    }
}

impl<T: Clone> Default for OneShot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for OneShot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShot")
            .field("satisfied", &self.cell.lock().is_some())
            .finish()
    }
}
