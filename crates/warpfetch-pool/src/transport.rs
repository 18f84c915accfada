//! Transport collaborator traits.
//!
//! The pool never speaks HTTP itself. A [`TransportProvider`] builds
//! [`TransportClient`]s bound to a shared [`EventLoopGroup`]; the pool only
//! asks a client whether it is mid-request and tells it to shut down.
//!
//! Methods that suspend return boxed futures so the traits stay object-safe
//! and can be stored as `Arc<dyn ...>` inside the pool.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use warpfetch_core::{ClientConfiguration, FetchResult};

/// Boxed future returned by [`TransportProvider::connect`].
pub type ConnectFuture<'a> =
    Pin<Box<dyn Future<Output = FetchResult<Arc<dyn TransportClient>>> + Send + 'a>>;

/// Boxed future returned by [`TransportClient::shutdown`].
pub type ShutdownFuture<'a> = Pin<Box<dyn Future<Output = FetchResult<()>> + Send + 'a>>;

/// Feature flags that distinguish otherwise identical providers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities {
    pub http2: bool,
    pub tls: bool,
    pub streaming_upload: bool,
}

/// Which transport a client belongs to: provider name plus capabilities.
///
/// Clients with the same identity share one [`EventLoopGroup`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransportIdentity {
    pub provider: String,
    pub capabilities: Capabilities,
}

impl TransportIdentity {
    pub fn new(provider: &str, capabilities: Capabilities) -> Self {
        Self {
            provider: provider.to_string(),
            capabilities,
        }
    }
}

impl fmt::Display for TransportIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.provider)?;
        let caps = self.capabilities;
        for (enabled, name) in [
            (caps.http2, "h2"),
            (caps.tls, "tls"),
            (caps.streaming_upload, "stream"),
        ] {
            if enabled {
                write!(f, "+{name}")?;
            }
        }
        Ok(())
    }
}

/// Event loop shared by every client of one transport identity.
///
/// Backed by the tokio runtime the pool was first used from.
#[derive(Debug)]
pub struct EventLoopGroup {
    id: u64,
    identity: TransportIdentity,
    handle: Handle,
}

impl EventLoopGroup {
    pub fn new(id: u64, identity: TransportIdentity, handle: Handle) -> Self {
        Self {
            id,
            identity,
            handle,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> &TransportIdentity {
        &self.identity
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run a transport task (read loop, keep-alive) on this group.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(task)
    }
}

/// A live client owned by the pool.
pub trait TransportClient: Send + Sync + fmt::Debug {
    /// True while the client is executing a request.
    ///
    /// A cancelled request must eventually make this report `false`, or the
    /// pool keeps the client alive forever.
    fn is_running(&self) -> bool;

    /// Gracefully close every connection the client holds.
    fn shutdown(&self) -> ShutdownFuture<'_>;
}

/// Builds clients for one transport implementation.
pub trait TransportProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn identity(&self) -> TransportIdentity {
        TransportIdentity::new(self.name(), self.capabilities())
    }

    /// Construct a client bound to `group` for `configuration`.
    fn connect<'a>(
        &'a self,
        group: Arc<EventLoopGroup>,
        configuration: &'a ClientConfiguration,
    ) -> ConnectFuture<'a>;
}
