//! Error types shared by every warpfetch crate.

use thiserror::Error;

/// Result type alias for warpfetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors produced by the streaming and pooling core.
///
/// Values are `Clone` because a single failure is broadcast as the
/// terminal element of every stream fed by the component that detected it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// An operation was attempted on a buffer, stream, or queue that has
    /// already been closed. Always a caller bug; never retried.
    #[error("resource already closed: {0}")]
    ClosedResource(&'static str),

    /// Opaque failure reported by the transport.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("client construction failed: {0}")]
    Construction(String),

    #[error("client shutdown failed: {0}")]
    Shutdown(String),

    #[error("invalid framing: {0}")]
    InvalidFraming(String),

    /// Backing storage of a file-backed buffer failed.
    #[error("buffer I/O error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FetchError {
    /// Convenience constructor for transport failures.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
