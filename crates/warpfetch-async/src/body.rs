//! Streaming upload bodies.
//!
//! [`ChunkedBodySequence`] cuts an ordered list of [`Buffer`]s into
//! fragments of at most `fragment_size` bytes. Fragments may span buffer
//! boundaries; concatenating them reproduces the buffers' readable bytes
//! in order. The sequence is read-once and forward-only.
//!
//! # Fragment size
//!
//! Unless the caller chooses one, the fragment size is
//! `max(1, total_size / 10_000)`, which bounds a large upload to about
//! [`PROGRESS_STEPS`] fragments (and therefore progress callbacks). An
//! empty body has a fragment size of zero and yields nothing.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use tracing::debug;
use warpfetch_core::{Buffer, FetchResult};

use crate::queue::SequentialQueue;

/// Target number of fragments for a body using the default fragment size.
pub const PROGRESS_STEPS: usize = 10_000;

/// A type-erased, fallible async stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = FetchResult<Bytes>> + Send>>;

/// Default fragment size for a body of `total_size` bytes.
pub fn default_fragment_size(total_size: usize) -> usize {
    if total_size == 0 {
        0
    } else {
        (total_size / PROGRESS_STEPS).max(1)
    }
}

/// Splits buffers into bounded fragments for streamed upload.
#[derive(Debug)]
pub struct ChunkedBodySequence {
    buffers: VecDeque<Buffer>,
    staging: Buffer,
    total_size: usize,
    fragment_size: usize,
    emitted: usize,
    finished: bool,
}

impl ChunkedBodySequence {
    /// Build a sequence over `buffers`, in order.
    ///
    /// A `fragment_size` of `None` or `Some(0)` selects the default.
    pub fn new(buffers: Vec<Buffer>, fragment_size: Option<usize>) -> Self {
        let total_size: usize = buffers.iter().map(Buffer::readable_bytes).sum();
        let fragment_size = match fragment_size {
            _ if total_size == 0 => 0,
            Some(size) if size > 0 => size,
            _ => default_fragment_size(total_size),
        };
        debug!(
            buffers = buffers.len(),
            total_size, fragment_size, "chunked body prepared"
        );
        Self {
            buffers: buffers.into_iter().filter(Buffer::is_readable).collect(),
            staging: Buffer::with_capacity(fragment_size),
            total_size,
            fragment_size,
            emitted: 0,
            finished: total_size == 0,
        }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// `(bytes_emitted, total_size)`.
    pub fn progress(&self) -> (usize, usize) {
        (self.emitted, self.total_size)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Adapt the sequence into the boxed stream type transports consume.
    pub fn into_stream(self) -> ByteStream {
        Box::pin(futures_util::stream::iter(self))
    }

    /// Drain every fragment into `queue` and close it.
    ///
    /// A read failure becomes the queue's terminal error instead of the
    /// close. Returns the number of fragments queued.
    pub fn pump_into(self, queue: &mut SequentialQueue<Bytes>) -> usize {
        let mut count = 0;
        for fragment in self {
            match fragment {
                Ok(fragment) => {
                    queue.append(Ok(Some(fragment)));
                    count += 1;
                }
                Err(error) => {
                    queue.append(Err(error));
                    return count;
                }
            }
        }
        queue.append(Ok(None));
        count
    }

    fn abort(&mut self) {
        self.finished = true;
        self.buffers.clear();
        self.staging.clear();
    }

    fn fill_staging(&mut self) -> FetchResult<()> {
        while let Some(head) = self.buffers.front_mut() {
            let wanted = self.fragment_size - self.staging.readable_bytes();
            self.staging.transfer_from(head, wanted)?;
            if !head.is_readable() {
                self.buffers.pop_front();
            }
            if self.staging.readable_bytes() == self.fragment_size {
                break;
            }
        }
        Ok(())
    }
}

impl Iterator for ChunkedBodySequence {
    type Item = FetchResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let fragment = self
            .fill_staging()
            .and_then(|()| self.staging.take_readable());
        match fragment {
            Ok(fragment) if fragment.is_empty() => {
                self.finished = true;
                None
            }
            Ok(fragment) => {
                self.emitted += fragment.len();
                if self.buffers.is_empty() {
                    self.finished = true;
                }
                Some(Ok(fragment))
            }
            Err(error) => {
                self.abort();
                Some(Err(error))
            }
        }
    }
}
