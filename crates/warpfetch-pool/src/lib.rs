//! warpfetch client pool.
//!
//! A [`ClientManager`] maps `(transport identity, configuration)` to a live
//! client. The first request for a key constructs the client; later
//! requests share it. A background [`Sweeper`] shuts down and evicts
//! clients that stayed idle for longer than the pool lifetime.
//!
//! There is no process-wide pool. Construct a manager, wrap it in an
//! `Arc`, and hand clones to whatever issues requests.

pub mod pool;
pub mod sweeper;
pub mod transport;

pub use pool::{ClientHandle, ClientManager, PoolKey, PoolStats, SweepStats};
pub use sweeper::Sweeper;
pub use transport::{
    Capabilities, ConnectFuture, EventLoopGroup, ShutdownFuture, TransportClient,
    TransportIdentity, TransportProvider,
};
