//! Cursor buffers used for request and response bodies.
//!
//! A [`Buffer`] owns a byte region with independent read and write cursors:
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | discardable bytes |  readable bytes  |  writable bytes  |
//! +-------------------+------------------+------------------+
//! 0           reader_index       writer_index          capacity
//! ```
//!
//! The region lives either on the heap (`BytesMut`) or in a temporary /
//! caller-supplied file. Consumers depend only on the cursor contract.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{FetchError, FetchResult};

enum Storage {
    Heap(BytesMut),
    File(File),
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Storage::Heap(buf) => write!(f, "Heap({} bytes)", buf.len()),
            Storage::File(_) => f.write_str("File"),
        }
    }
}

/// Growable byte region with independent read and write cursors.
///
/// Invariant: `reader_index <= writer_index <= capacity`.
#[derive(Debug)]
pub struct Buffer {
    storage: Storage,
    reader_index: usize,
    writer_index: usize,
}

impl Buffer {
    /// Create an empty heap-backed buffer.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Storage::Heap(BytesMut::with_capacity(capacity)),
            reader_index: 0,
            writer_index: 0,
        }
    }

    /// Create a heap-backed buffer whose readable bytes are `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            storage: Storage::Heap(BytesMut::from(data)),
            reader_index: 0,
            writer_index: data.len(),
        }
    }

    /// Create an empty buffer backed by an anonymous temporary file.
    pub fn file_backed() -> FetchResult<Self> {
        let file = tempfile::tempfile()?;
        Ok(Self {
            storage: Storage::File(file),
            reader_index: 0,
            writer_index: 0,
        })
    }

    /// Wrap an existing file; its whole current contents are readable.
    pub fn from_file(file: File) -> FetchResult<Self> {
        let size = file.metadata()?.len();
        let len = usize::try_from(size)
            .map_err(|_| FetchError::Io(format!("file of {size} bytes is not addressable")))?;
        debug!(len, "wrapped existing file as buffer");
        Ok(Self {
            storage: Storage::File(file),
            reader_index: 0,
            writer_index: len,
        })
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.storage, Storage::File(_))
    }

    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    pub fn writer_index(&self) -> usize {
        self.writer_index
    }

    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Heap(buf) => buf.capacity().max(self.writer_index),
            Storage::File(_) => self.writer_index,
        }
    }

    /// Number of bytes between the read and write cursors.
    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    pub fn is_readable(&self) -> bool {
        self.readable_bytes() > 0
    }

    /// Advance the read cursor by up to `len` bytes; returns how far it moved.
    pub fn skip(&mut self, len: usize) -> usize {
        let n = len.min(self.readable_bytes());
        self.reader_index += n;
        n
    }

    /// Append bytes at the write cursor.
    pub fn write_bytes(&mut self, data: &[u8]) -> FetchResult<()> {
        match &mut self.storage {
            Storage::Heap(buf) => buf.extend_from_slice(data),
            Storage::File(file) => {
                file.seek(SeekFrom::Start(self.writer_index as u64))?;
                file.write_all(data)?;
            }
        }
        self.writer_index += data.len();
        Ok(())
    }

    /// Append `other`'s unread bytes, consuming them from `other`.
    pub fn write_buffer(&mut self, other: &mut Buffer) -> FetchResult<usize> {
        self.transfer_from(other, usize::MAX)
    }

    /// Move at most `max` unread bytes from `other` into this buffer.
    pub fn transfer_from(&mut self, other: &mut Buffer, max: usize) -> FetchResult<usize> {
        let len = max.min(other.readable_bytes());
        if len == 0 {
            return Ok(0);
        }
        let bytes = other.slice(other.reader_index, len)?;
        self.write_bytes(&bytes)?;
        other.reader_index += len;
        Ok(len)
    }

    /// Byte at absolute `index`, without moving either cursor.
    ///
    /// Returns `None` when `index` is at or past the write cursor.
    pub fn get_byte(&self, index: usize) -> FetchResult<Option<u8>> {
        if index >= self.writer_index {
            return Ok(None);
        }
        match &self.storage {
            Storage::Heap(buf) => Ok(Some(buf[index])),
            Storage::File(file) => {
                let mut byte = [0u8; 1];
                let mut reader = file;
                reader.seek(SeekFrom::Start(index as u64))?;
                reader.read_exact(&mut byte)?;
                Ok(Some(byte[0]))
            }
        }
    }

    /// Copy of `len` bytes starting at absolute `index`, without moving cursors.
    pub fn slice(&self, index: usize, len: usize) -> FetchResult<Bytes> {
        let end = index
            .checked_add(len)
            .filter(|end| *end <= self.writer_index)
            .ok_or_else(|| {
                FetchError::Io(format!(
                    "slice of {len} bytes at {index} out of bounds (writer index {})",
                    self.writer_index
                ))
            })?;
        match &self.storage {
            Storage::Heap(buf) => Ok(Bytes::copy_from_slice(&buf[index..end])),
            Storage::File(file) => {
                let mut out = vec![0u8; len];
                let mut reader = file;
                reader.seek(SeekFrom::Start(index as u64))?;
                reader.read_exact(&mut out)?;
                Ok(Bytes::from(out))
            }
        }
    }

    /// Read up to `len` bytes, advancing the read cursor.
    pub fn read_bytes(&mut self, len: usize) -> FetchResult<Bytes> {
        let len = len.min(self.readable_bytes());
        if let Storage::Heap(buf) = &mut self.storage {
            // Heap reads split off the front without copying.
            let _ = buf.split_to(self.reader_index);
            self.writer_index -= self.reader_index;
            self.reader_index = 0;
            let out = buf.split_to(len).freeze();
            self.writer_index -= len;
            return Ok(out);
        }
        let out = self.slice(self.reader_index, len)?;
        self.reader_index += len;
        Ok(out)
    }

    /// Take every readable byte and reset the buffer to empty.
    pub fn take_readable(&mut self) -> FetchResult<Bytes> {
        let out = self.read_bytes(self.readable_bytes())?;
        self.clear();
        Ok(out)
    }

    /// Drop bytes before the read cursor so they stop occupying memory.
    ///
    /// File-backed buffers keep their region; only the cursors matter there.
    pub fn discard_read_bytes(&mut self) {
        if let Storage::Heap(buf) = &mut self.storage {
            let _ = buf.split_to(self.reader_index);
            self.writer_index -= self.reader_index;
            self.reader_index = 0;
        }
    }

    /// Reset both cursors. Heap storage is truncated; file storage is reused.
    pub fn clear(&mut self) {
        if let Storage::Heap(buf) = &mut self.storage {
            buf.clear();
        }
        self.reader_index = 0;
        self.writer_index = 0;
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            storage: Storage::Heap(BytesMut::from(&data[..])),
            reader_index: 0,
            writer_index: len,
        }
    }
}
