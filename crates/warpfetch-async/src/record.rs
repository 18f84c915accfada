//! Streaming download re-framing.
//!
//! The transport hands over byte chunks of arbitrary size. A
//! [`RecordFramer`] turns them into complete records, either exactly `L`
//! bytes long or terminated by (and including) a separator. A
//! [`RecordDownloadBuffer`] drives a framer and publishes every record to
//! a primary [`BroadcastStream`] and, optionally, a cache stream.
//!
//! Framing is synchronous; only publishing awaits the streams' writer
//! locks. Separator search is a naive streaming scan: each candidate
//! window of `k` bytes is compared in full, and on a mismatch the scan
//! resumes one byte later, re-testing the overlapping window.

use bytes::Bytes;
use tracing::{debug, warn};
use warpfetch_core::{Buffer, FetchError, FetchResult};

use crate::broadcast::BroadcastStream;

/// How incoming bytes are cut into records. Chosen once per download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Records of exactly this many bytes; the last may be shorter.
    Length(usize),
    /// Records ending with this byte sequence, separator included.
    Separator(Bytes),
}

impl Framing {
    /// CRLF-terminated records.
    pub fn lines() -> Self {
        Framing::Separator(Bytes::from_static(b"\r\n"))
    }

    fn validate(&self) -> FetchResult<()> {
        match self {
            Framing::Length(0) => Err(FetchError::InvalidFraming(
                "record length must be non-zero".into(),
            )),
            Framing::Separator(sep) if sep.is_empty() => Err(FetchError::InvalidFraming(
                "record separator must be non-empty".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Synchronous re-framing state machine.
#[derive(Debug)]
pub struct RecordFramer {
    framing: Framing,
    incoming: Buffer,
    staging: Buffer,
}

impl RecordFramer {
    pub fn new(framing: Framing) -> FetchResult<Self> {
        framing.validate()?;
        Ok(Self {
            framing,
            incoming: Buffer::new(),
            staging: Buffer::new(),
        })
    }

    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    /// Bytes received but not yet part of an emitted record.
    pub fn pending(&self) -> usize {
        self.incoming.readable_bytes() + self.staging.readable_bytes()
    }

    /// Feed a chunk; returns every record it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> FetchResult<Vec<Bytes>> {
        self.incoming.write_bytes(chunk)?;
        let records = match &self.framing {
            Framing::Length(len) => self.drain_fixed(*len)?,
            Framing::Separator(sep) => {
                let sep = sep.clone();
                self.drain_separated(&sep)?
            }
        };
        self.incoming.discard_read_bytes();
        Ok(records)
    }

    fn drain_fixed(&mut self, len: usize) -> FetchResult<Vec<Bytes>> {
        let mut records = Vec::new();
        while self.incoming.is_readable() {
            let wanted = len - self.staging.readable_bytes();
            self.staging.transfer_from(&mut self.incoming, wanted)?;
            if self.staging.readable_bytes() == len {
                records.push(self.staging.take_readable()?);
            }
        }
        Ok(records)
    }

    fn drain_separated(&mut self, sep: &[u8]) -> FetchResult<Vec<Bytes>> {
        let k = sep.len();
        let end = self.incoming.writer_index();
        let mut records = Vec::new();
        let mut pos = self.incoming.reader_index();

        while pos + k <= end {
            if self.window_matches(pos, sep)? {
                let upto = pos + k - self.incoming.reader_index();
                self.staging.transfer_from(&mut self.incoming, upto)?;
                records.push(self.staging.take_readable()?);
                pos = self.incoming.reader_index();
            } else {
                pos += 1;
            }
        }

        // Bytes before `pos` can no longer start a separator.
        let settled = pos - self.incoming.reader_index();
        self.staging.transfer_from(&mut self.incoming, settled)?;
        Ok(records)
    }

    fn window_matches(&self, start: usize, sep: &[u8]) -> FetchResult<bool> {
        for (offset, expected) in sep.iter().enumerate() {
            if self.incoming.get_byte(start + offset)? != Some(*expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Flush at end of input.
    ///
    /// Fixed-length framing yields the short remainder, if any. Separator
    /// framing always yields the trailing record, even when it is empty.
    pub fn finish(&mut self) -> FetchResult<Option<Bytes>> {
        self.staging.write_buffer(&mut self.incoming)?;
        self.incoming.clear();
        let rest = self.staging.take_readable()?;
        Ok(match self.framing {
            Framing::Length(_) if rest.is_empty() => None,
            _ => Some(rest),
        })
    }

    /// Discard everything buffered.
    pub fn reset(&mut self) {
        self.incoming.clear();
        self.staging.clear();
    }
}

/// Re-frames a download and broadcasts each record.
#[derive(Debug)]
pub struct RecordDownloadBuffer {
    framer: RecordFramer,
    primary: BroadcastStream<Bytes>,
    cache: Option<BroadcastStream<Bytes>>,
    records: usize,
    closed: bool,
}

impl RecordDownloadBuffer {
    pub fn new(framing: Framing) -> FetchResult<Self> {
        Ok(Self {
            framer: RecordFramer::new(framing)?,
            primary: BroadcastStream::new(),
            cache: None,
            records: 0,
            closed: false,
        })
    }

    /// Also publish every record to `cache`.
    pub fn with_cache(mut self, cache: BroadcastStream<Bytes>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The primary record stream. Subscribe to it to read records.
    pub fn stream(&self) -> BroadcastStream<Bytes> {
        self.primary.clone()
    }

    pub fn cache_stream(&self) -> Option<BroadcastStream<Bytes>> {
        self.cache.clone()
    }

    /// Records published so far.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Feed a chunk read by the transport; returns how many records it completed.
    pub async fn append(&mut self, chunk: &[u8]) -> FetchResult<usize> {
        if self.closed {
            return Err(FetchError::ClosedResource("record download buffer"));
        }
        match self.framer.push(chunk) {
            Ok(records) => {
                let count = records.len();
                for record in records {
                    self.publish(record).await;
                }
                Ok(count)
            }
            Err(error) => {
                self.failed(error.clone()).await;
                Err(error)
            }
        }
    }

    /// Feed a transport buffer, consuming its readable bytes.
    pub async fn append_buffer(&mut self, buffer: &mut Buffer) -> FetchResult<usize> {
        if self.closed {
            return Err(FetchError::ClosedResource("record download buffer"));
        }
        let bytes = buffer.take_readable()?;
        self.append(&bytes).await
    }

    /// End of input: flush the trailing record and close every stream.
    pub async fn close(&mut self) {
        if self.closed {
            debug!("record download buffer already closed");
            return;
        }
        match self.framer.finish() {
            Ok(rest) => {
                if let Some(record) = rest {
                    self.publish(record).await;
                }
                self.closed = true;
                self.primary.close().await;
                if let Some(cache) = &self.cache {
                    cache.close().await;
                }
                debug!(records = self.records, "download complete");
            }
            Err(error) => self.failed(error).await,
        }
    }

    /// Abort the download: drop partial data and terminate every stream with `error`.
    pub async fn failed(&mut self, error: FetchError) {
        if self.closed {
            debug!(%error, "failure after close ignored");
            return;
        }
        self.closed = true;
        self.framer.reset();
        warn!(%error, records = self.records, "download failed");
        if let Some(cache) = &self.cache {
            cache.fail(error.clone()).await;
        }
        self.primary.fail(error).await;
    }

    async fn publish(&mut self, record: Bytes) {
        self.records += 1;
        if let Some(cache) = &self.cache {
            cache.send(record.clone()).await;
        }
        self.primary.send(record).await;
    }
}
