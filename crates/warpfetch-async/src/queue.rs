//! Non-replayable FIFO for a single consumer.
//!
//! Items are yielded once, in order. A latched failure is reported by
//! `next()` exactly once, after the items that preceded it, and the queue
//! reads as empty afterwards.

use std::collections::VecDeque;

use tracing::debug;
use warpfetch_core::{FetchError, FetchResult};

#[derive(Debug)]
pub struct SequentialQueue<T> {
    items: VecDeque<T>,
    error: Option<FetchError>,
    closed: bool,
}

impl<T> SequentialQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            error: None,
            closed: false,
        }
    }

    /// `Ok(Some(v))` enqueues, `Ok(None)` closes, `Err(e)` latches `e` and closes.
    ///
    /// Anything appended after the queue closed is dropped.
    pub fn append(&mut self, value: FetchResult<Option<T>>) {
        if self.closed {
            debug!("append to closed queue ignored");
            return;
        }
        match value {
            Ok(Some(item)) => self.items.push_back(item),
            Ok(None) => self.closed = true,
            Err(error) => {
                self.error = Some(error);
                self.closed = true;
            }
        }
    }

    /// Pop the next item; `Ok(None)` is end-of-queue.
    pub fn next(&mut self) -> FetchResult<Option<T>> {
        if let Some(item) = self.items.pop_front() {
            return Ok(Some(item));
        }
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True once nothing more will ever be yielded.
    pub fn is_finished(&self) -> bool {
        self.closed && self.items.is_empty() && self.error.is_none()
    }

    /// Items buffered and not yet consumed.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for SequentialQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
