//! Shared types for the warpfetch streaming and pooling core.
//!
//! - [`FetchError`]: the error taxonomy every other crate propagates.
//! - [`Buffer`]: heap- or file-backed byte region with read/write cursors.
//! - [`KeyedTable`]: chained hash table with doubling resize.
//! - [`config`]: `warpfetch.toml` parsing and the typed client/pool settings.

pub mod buffer;
pub mod config;
pub mod error;
pub mod table;

pub use buffer::Buffer;
pub use config::{ClientConfiguration, FetchConfig, PoolSettings, TlsConfiguration};
pub use error::{FetchError, FetchResult};
pub use table::KeyedTable;
