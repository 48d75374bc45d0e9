//! Ordered queue of undelivered messages for one actor.
//!
//! The mailbox is only ever touched by the thread currently draining its
//! actor, so it carries no locking of its own; the actor's channel lock
//! guards the staging lists that feed it.
//!
//! Beyond plain FIFO it supports two things a `VecDeque` alone would not
//! advertise:
//!
//! - **front insertion** for priority batches, so urgent messages overtake
//!   everything already resident without disturbing relative order;
//! - **first-match removal**, so a selective handler can consume the first
//!   applicable item while non-matching items stay put, in order, for a
//!   later pass.

use std::collections::VecDeque;

/// Append/overtake queue with ordered first-match removal.
#[derive(Debug)]
pub(crate) struct Mailbox<T> {
    items: VecDeque<T>,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append to the tail (normal arrival order).
    pub(crate) fn push_back(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Insert at the head, ahead of every resident item.
    ///
    /// To enqueue a batch in arrival order, push its elements in reverse.
    pub(crate) fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    /// Remove and return the first item matching `pred`.
    ///
    /// The relative order of all remaining items is preserved; items the
    /// predicate rejects are skipped, not consumed.
    pub(crate) fn take_first(&mut self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        let index = self.items.iter().position(|item| pred(item))?;
        self.items.remove(index)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}
