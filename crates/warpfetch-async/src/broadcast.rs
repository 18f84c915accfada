//! Replayable, multi-reader broadcast log.
//!
//! The stream is an append-only chain of immutable nodes stored in a
//! [`Slab`] arena. Each node holds one `FetchResult<T>` and, once the next
//! value arrives, the index of its successor. Readers hold an index into the
//! chain instead of a pointer, so any number of them can walk it from the
//! root at their own pace.
//!
//! ```text
//! root                                   tail
//!  [Ok a] ──▶ [Ok b] ──▶ [Ok c] ──▶ [Err e]   (closed)
//!    ▲                      ▲
//! reader 1              reader 2
//! ```
//!
//! Writers (`append`/`close`) are serialized by an [`AsyncMutex`], so every
//! reader observes them in the order they acquired it. A failure is a
//! terminal node: it closes the stream and every reader, past or future,
//! yields exactly the values before it followed by the failure.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use futures_core::Stream;
use slab::Slab;
use tracing::debug;
use warpfetch_core::{FetchError, FetchResult};

use crate::mutex::AsyncMutex;

/// One cell of the chain. Immutable except for its single successor link.
#[derive(Debug)]
pub(crate) struct StreamNode<T> {
    value: FetchResult<T>,
    next: Option<usize>,
}

impl<T> StreamNode<T> {
    fn new(value: FetchResult<T>) -> Self {
        Self { value, next: None }
    }

    /// Attach the successor.
    ///
    /// # Panics
    ///
    /// Panics if a successor is already attached; a second link would
    /// silently fork the chain under readers already past this node.
    fn link(&mut self, next: usize) {
        assert!(self.next.is_none(), "stream node already linked");
        self.next = Some(next);
    }
}

#[derive(Debug)]
struct Chain<T> {
    nodes: Slab<StreamNode<T>>,
    root: Option<usize>,
    tail: Option<usize>,
    closed: bool,
    wakers: Vec<Waker>,
}

impl<T> Chain<T> {
    fn push(&mut self, value: FetchResult<T>) -> bool {
        if self.closed {
            return false;
        }
        let terminal = value.is_err();
        let idx = self.nodes.insert(StreamNode::new(value));
        match self.tail {
            Some(tail) => self.nodes[tail].link(idx),
            None => self.root = Some(idx),
        }
        self.tail = Some(idx);
        if terminal {
            self.closed = true;
        }
        self.wake_readers();
        true
    }

    fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.wake_readers();
        true
    }

    fn wake_readers(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }

    fn register(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }
}

struct Shared<T> {
    writer: AsyncMutex<()>,
    chain: Mutex<Chain<T>>,
}

impl<T> Shared<T> {
    fn chain(&self) -> MutexGuard<'_, Chain<T>> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-producer, multi-consumer, replayable asynchronous sequence.
///
/// Cloning the handle shares the same chain.
pub struct BroadcastStream<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BroadcastStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for BroadcastStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chain = self.shared.chain();
        f.debug_struct("BroadcastStream")
            .field("len", &chain.nodes.len())
            .field("closed", &chain.closed)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> BroadcastStream<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                writer: AsyncMutex::new(()),
                chain: Mutex::new(Chain {
                    nodes: Slab::new(),
                    root: None,
                    tail: None,
                    closed: false,
                    wakers: Vec::new(),
                }),
            }),
        }
    }

    /// Append a value. A failure is terminal and closes the stream.
    ///
    /// Returns `false` (and drops `value`) if the stream was already closed.
    pub async fn append(&self, value: FetchResult<T>) -> bool {
        let _writer = self.shared.writer.lock().await;
        let appended = self.shared.chain().push(value);
        if !appended {
            debug!("append to closed broadcast stream ignored");
        }
        appended
    }

    /// Shorthand for `append(Ok(value))`.
    pub async fn send(&self, value: T) -> bool {
        self.append(Ok(value)).await
    }

    /// Shorthand for `append(Err(error))`.
    pub async fn fail(&self, error: FetchError) -> bool {
        self.append(Err(error)).await
    }

    /// Mark the stream finished without a terminal value.
    ///
    /// Returns `false` if it was already closed.
    pub async fn close(&self) -> bool {
        let _writer = self.shared.writer.lock().await;
        self.shared.chain().close()
    }

    /// Start an independent reader at the root of the chain.
    pub fn subscribe(&self) -> Subscriber<T> {
        Subscriber {
            shared: Arc::clone(&self.shared),
            cursor: Cursor::Start,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.chain().closed
    }

    /// Number of nodes appended so far, including a terminal failure.
    pub fn len(&self) -> usize {
        self.shared.chain().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole stream from the root, waiting for it to close.
    pub async fn collect(&self) -> FetchResult<Vec<T>> {
        let mut reader = self.subscribe();
        let mut values = Vec::new();
        while let Some(item) = reader.recv().await {
            values.push(item?);
        }
        Ok(values)
    }
}

impl<T: Clone> Default for BroadcastStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    /// Nothing read yet; the next node is the root.
    Start,
    /// Last node read.
    After(usize),
    /// A failure was yielded or the end observed.
    Done,
}

/// Independent reader over a [`BroadcastStream`].
pub struct Subscriber<T> {
    shared: Arc<Shared<T>>,
    cursor: Cursor,
}

impl<T: Clone> Subscriber<T> {
    fn poll_advance(&mut self, cx: &mut Context<'_>) -> Poll<Option<FetchResult<T>>> {
        let mut chain = self.shared.chain();
        let next = match self.cursor {
            Cursor::Start => chain.root,
            Cursor::After(idx) => chain.nodes[idx].next,
            Cursor::Done => return Poll::Ready(None),
        };

        match next {
            Some(idx) => {
                let value = chain.nodes[idx].value.clone();
                self.cursor = if value.is_err() {
                    Cursor::Done
                } else {
                    Cursor::After(idx)
                };
                Poll::Ready(Some(value))
            }
            None if chain.closed => {
                self.cursor = Cursor::Done;
                Poll::Ready(None)
            }
            None => {
                chain.register(cx.waker());
                Poll::Pending
            }
        }
    }

    /// Next value, waiting for the writer if the reader is caught up.
    /// `None` once the stream has ended or a failure was yielded.
    pub async fn recv(&mut self) -> Option<FetchResult<T>> {
        std::future::poll_fn(|cx| self.poll_advance(cx)).await
    }
}

impl<T: Clone> Stream for Subscriber<T> {
    type Item = FetchResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_advance(cx)
    }
}

impl<T> std::fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn drain(mut reader: Subscriber<u32>) -> (Vec<u32>, Option<FetchError>) {
        let mut values = Vec::new();
        while let Some(item) = reader.next().await {
            match item {
                Ok(v) => values.push(v),
                Err(e) => {
                    assert!(reader.next().await.is_none(), "values after failure");
                    return (values, Some(e));
                }
            }
        }
        (values, None)
    }

    #[test]
    #[should_panic(expected = "stream node already linked")]
    fn double_link_panics() {
        let mut node: StreamNode<u32> = StreamNode::new(Ok(1));
        node.link(1);
        node.link(2);
    }

    #[tokio::test]
    async fn readers_started_at_different_times_replay_everything() {
        let stream = BroadcastStream::new();
        let early = stream.subscribe();

        for i in 0..3 {
            assert!(stream.send(i).await);
        }
        let middle = stream.subscribe();
        for i in 3..5 {
            stream.send(i).await;
        }
        assert!(stream.close().await);
        let late = stream.subscribe();

        for reader in [early, middle, late] {
            let (values, err) = drain(reader).await;
            assert_eq!(values, vec![0, 1, 2, 3, 4]);
            assert!(err.is_none());
        }
    }

    #[tokio::test]
    async fn failure_truncates_for_every_reader() {
        let stream = BroadcastStream::new();
        let before = stream.subscribe();
        stream.send(1).await;
        stream.send(2).await;
        assert!(stream.fail(FetchError::transport("reset")).await);

        assert!(stream.is_closed());
        assert!(!stream.send(3).await, "append after failure must be ignored");
        assert!(!stream.close().await);

        let after = stream.subscribe();
        for reader in [before, after] {
            let (values, err) = drain(reader).await;
            assert_eq!(values, vec![1, 2]);
            assert_eq!(err, Some(FetchError::transport("reset")));
        }
        assert_eq!(stream.len(), 3);
    }

    #[tokio::test]
    async fn reader_waits_for_append() {
        let stream = BroadcastStream::new();
        let mut reader = stream.subscribe();

        let writer = stream.clone();
        let task = tokio::spawn(async move {
            tokio::task::yield_now().await;
            writer.send(42u32).await;
        });

        assert_eq!(reader.recv().await, Some(Ok(42)));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn close_wakes_waiting_reader() {
        let stream: BroadcastStream<u32> = BroadcastStream::new();
        let reader = stream.subscribe();
        let handle = tokio::spawn(drain(reader));

        tokio::task::yield_now().await;
        stream.close().await;

        let (values, err) = handle.await.unwrap();
        assert!(values.is_empty());
        assert!(err.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_are_observed_in_one_order() {
        let stream = BroadcastStream::new();
        let readers: Vec<_> = (0..3).map(|_| stream.subscribe()).collect();

        let mut writers = Vec::new();
        for w in 0..4u32 {
            let stream = stream.clone();
            writers.push(tokio::spawn(async move {
                for i in 0..25 {
                    stream.send(w * 100 + i).await;
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }
        stream.close().await;

        let mut observed = Vec::new();
        for reader in readers {
            observed.push(drain(reader).await.0);
        }
        assert_eq!(observed[0].len(), 100);
        assert!(observed.iter().all(|seq| *seq == observed[0]));
    }

    #[tokio::test]
    async fn collect_returns_values_or_failure() {
        let ok = BroadcastStream::new();
        ok.send("a").await;
        ok.send("b").await;
        ok.close().await;
        assert_eq!(ok.collect().await.unwrap(), vec!["a", "b"]);

        let failed: BroadcastStream<&str> = BroadcastStream::new();
        failed.send("a").await;
        failed.fail(FetchError::transport("eof")).await;
        assert!(failed.collect().await.is_err());
    }
}
