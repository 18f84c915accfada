//! Client pool keyed by transport identity and configuration.
//!
//! # Architecture
//!
//! ```text
//! client(provider, configuration)
//!   → identity = provider name + capabilities
//!   → event loop group for identity (memoized, own lock)
//!   → pool lock
//!       → entry for (identity, configuration) → refresh timestamp, share handle
//!       → no entry → construct client (lock held) → insert → share handle
//! ```
//!
//! Holding the pool lock across construction makes cold starts
//! single-flight: racing callers for a never-seen key queue on the lock and
//! find the entry the first caller inserted. A failed construction inserts
//! nothing, so the next call retries.
//!
//! Idle clients are evicted by [`ClientManager::sweep`], normally driven by
//! the background [`Sweeper`](crate::Sweeper). Eviction only holds the pool
//! lock to detach entries; transport shutdowns run without it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warpfetch_async::AsyncMutex;
use warpfetch_core::{
    ClientConfiguration, FetchConfig, FetchError, FetchResult, KeyedTable, PoolSettings,
};

use crate::transport::{EventLoopGroup, TransportClient, TransportIdentity, TransportProvider};

/// Key of a pooled client. Configuration is compared by value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub identity: TransportIdentity,
    pub configuration: ClientConfiguration,
}

/// Shared reference to a pooled client.
///
/// Two handles are equal when they refer to the same client instance.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    client: Arc<dyn TransportClient>,
    group: Arc<EventLoopGroup>,
}

impl ClientHandle {
    pub fn client(&self) -> &Arc<dyn TransportClient> {
        &self.client
    }

    pub fn event_loop_group(&self) -> &Arc<EventLoopGroup> {
        &self.group
    }

    pub fn is_running(&self) -> bool {
        self.client.is_running()
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.client), Arc::as_ptr(&other.client))
    }
}

impl Eq for ClientHandle {}

#[derive(Clone, Debug)]
struct PoolEntry {
    handle: ClientHandle,
    last_used: Instant,
}

/// Outcome of one eviction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Running clients whose timestamp was refreshed.
    pub refreshed: usize,
    /// Idle clients shut down and removed.
    pub evicted: usize,
    /// Idle clients whose shutdown failed; retried next pass.
    pub failed: usize,
    /// Entries left after the pass.
    pub retained: usize,
}

/// Point-in-time pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub entries: usize,
    pub event_loop_groups: usize,
    /// Detached clients waiting for a successful shutdown.
    pub retiring: usize,
    /// Clients constructed over the manager's lifetime.
    pub constructed: u64,
}

/// Caches live transport clients and evicts idle ones.
pub struct ClientManager {
    entries: AsyncMutex<KeyedTable<PoolKey, PoolEntry>>,
    groups: Mutex<KeyedTable<TransportIdentity, Arc<EventLoopGroup>>>,
    /// Detached clients whose shutdown failed after their key was rebuilt.
    retiring: Mutex<Vec<(PoolKey, PoolEntry)>>,
    settings: PoolSettings,
    constructed: AtomicU64,
    next_group: AtomicU64,
}

impl ClientManager {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            entries: AsyncMutex::new(KeyedTable::new()),
            groups: Mutex::new(KeyedTable::new()),
            retiring: Mutex::new(Vec::new()),
            settings,
            constructed: AtomicU64::new(0),
            next_group: AtomicU64::new(1),
        }
    }

    /// Build a manager from the `[pool]` section of a config document.
    pub fn from_config(config: &FetchConfig) -> FetchResult<Self> {
        Ok(Self::new(config.pool_settings()?))
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Get the pooled client for `(provider, configuration)`, constructing it
    /// on first use.
    pub async fn client(
        &self,
        provider: &dyn TransportProvider,
        configuration: &ClientConfiguration,
    ) -> FetchResult<ClientHandle> {
        let identity = provider.identity();
        let group = self.event_loop_group(&identity)?;
        let key = PoolKey {
            identity,
            configuration: configuration.clone(),
        };

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            entry.last_used = Instant::now();
            debug!(
                identity = %key.identity,
                host = %key.configuration.host,
                "reused pooled client"
            );
            return Ok(entry.handle.clone());
        }

        let client = provider
            .connect(Arc::clone(&group), configuration)
            .await
            .map_err(|error| match error {
                FetchError::Construction(_) => error,
                other => FetchError::Construction(other.to_string()),
            })
            .inspect_err(|error| {
                warn!(
                    identity = %key.identity,
                    host = %key.configuration.host,
                    %error,
                    "client construction failed"
                );
            })?;

        let handle = ClientHandle { client, group };
        self.constructed.fetch_add(1, Ordering::Relaxed);
        debug!(
            identity = %key.identity,
            host = %key.configuration.host,
            port = ?key.configuration.port,
            entries = entries.len() + 1,
            "constructed pooled client"
        );
        entries.insert(
            key,
            PoolEntry {
                handle: handle.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(handle)
    }

    /// Shared event loop group for `identity`, created on first use.
    fn event_loop_group(&self, identity: &TransportIdentity) -> FetchResult<Arc<EventLoopGroup>> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(group) = groups.get(identity) {
            return Ok(Arc::clone(group));
        }
        let handle = Handle::try_current()
            .map_err(|e| FetchError::Construction(format!("no async runtime: {e}")))?;
        let id = self.next_group.fetch_add(1, Ordering::Relaxed);
        let group = Arc::new(EventLoopGroup::new(id, identity.clone(), handle));
        groups.insert(identity.clone(), Arc::clone(&group));
        debug!(%identity, group = id, "created event loop group");
        Ok(group)
    }

    /// One eviction pass over every entry.
    ///
    /// Running clients are kept and refreshed. Clients idle for longer than
    /// the configured lifetime are detached under the lock and shut down
    /// after it is released, so a slow shutdown never stalls [`client`].
    /// A client whose shutdown fails is put back under its key, or parked
    /// for the next pass if a newer client took the key meanwhile.
    ///
    /// [`client`]: ClientManager::client
    pub async fn sweep(&self) -> SweepStats {
        let lifetime = self.settings.lifetime;
        let mut stats = SweepStats::default();
        let mut expired = self.take_retiring();

        {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            entries.retain(|key, entry| {
                if entry.handle.is_running() {
                    entry.last_used = now;
                    stats.refreshed += 1;
                    true
                } else if now.duration_since(entry.last_used) > lifetime {
                    expired.push((key.clone(), entry.clone()));
                    false
                } else {
                    true
                }
            });
        }

        for (key, entry) in expired {
            match entry.handle.client().shutdown().await {
                Ok(()) => {
                    stats.evicted += 1;
                    info!(
                        identity = %key.identity,
                        host = %key.configuration.host,
                        "evicted idle client"
                    );
                }
                Err(error) => {
                    stats.failed += 1;
                    warn!(
                        identity = %key.identity,
                        host = %key.configuration.host,
                        %error,
                        "idle client shutdown failed, will retry"
                    );
                    self.restore(key, entry).await;
                }
            }
        }

        stats.retained = self.entries.lock().await.len();
        stats
    }

    /// Shut down every pooled client.
    ///
    /// The table is emptied under the lock and the shutdowns run after it is
    /// released. Clients that fail to shut down are put back. Returns the
    /// number of failures.
    pub async fn shutdown_all(&self) -> usize {
        let mut pooled = self.take_retiring();
        {
            let mut entries = self.entries.lock().await;
            entries.retain(|key, entry| {
                pooled.push((key.clone(), entry.clone()));
                false
            });
        }

        let mut failed = 0;
        for (key, entry) in pooled {
            if let Err(error) = entry.handle.client().shutdown().await {
                failed += 1;
                warn!(
                    identity = %key.identity,
                    host = %key.configuration.host,
                    %error,
                    "client shutdown failed during drain"
                );
                self.restore(key, entry).await;
            }
        }

        let remaining = self.entries.lock().await.len();
        info!(remaining, failed, "client pool drained");
        failed
    }

    /// Return a client whose shutdown failed to the pool.
    async fn restore(&self, key: PoolKey, entry: PoolEntry) {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&key) {
            debug!(
                identity = %key.identity,
                host = %key.configuration.host,
                "key rebuilt during shutdown, parking old client"
            );
            self.retiring
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((key, entry));
        } else {
            entries.insert(key, entry);
        }
    }

    fn take_retiring(&self) -> Vec<(PoolKey, PoolEntry)> {
        std::mem::take(&mut *self.retiring.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub async fn stats(&self) -> PoolStats {
        let entries = self.entries.lock().await.len();
        let event_loop_groups = self
            .groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let retiring = self
            .retiring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        PoolStats {
            entries,
            event_loop_groups,
            retiring,
            constructed: self.constructed.load(Ordering::Relaxed),
        }
    }

    /// Log pool statistics at `tracing::info` level.
    pub async fn log_stats(&self) {
        let stats = self.stats().await;
        info!(
            entries = stats.entries,
            event_loop_groups = stats.event_loop_groups,
            retiring = stats.retiring,
            constructed = stats.constructed,
            lifetime = ?self.settings.lifetime,
            "client pool statistics"
        );
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new(PoolSettings::default())
    }
}

impl fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientManager")
            .field("settings", &self.settings)
            .field("constructed", &self.constructed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
