//! Background eviction task.
//!
//! The sweeper wakes every pool lifetime and runs
//! [`ClientManager::sweep`]. It holds only a weak reference to the manager:
//! once the last `Arc<ClientManager>` is dropped the loop exits on its next
//! wake-up.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pool::ClientManager;

/// Handle to a running sweep loop. Dropping it also stops the loop.
#[derive(Debug)]
pub struct Sweeper {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Sweeper {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "pool sweeper task ended abnormally");
        }
        info!("pool sweeper stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl ClientManager {
    /// Spawn the periodic eviction loop on the current runtime.
    pub fn start_sweeper(self: &Arc<Self>) -> Sweeper {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = self.settings().lifetime;
        let manager = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            run_sweep_loop(manager, interval, shutdown_rx).await;
        });

        info!(?interval, "pool sweeper started");
        Sweeper {
            handle,
            shutdown_tx,
        }
    }
}

async fn run_sweep_loop(
    manager: Weak<ClientManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let Some(manager) = manager.upgrade() else {
                    debug!("client manager dropped, sweeper exiting");
                    break;
                };
                let stats = manager.sweep().await;
                debug!(
                    refreshed = stats.refreshed,
                    evicted = stats.evicted,
                    failed = stats.failed,
                    retained = stats.retained,
                    "pool sweep complete"
                );
            }
            _ = shutdown.changed() => {
                debug!("pool sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpfetch_core::PoolSettings;

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_loop() {
        let pool = Arc::new(ClientManager::new(PoolSettings {
            lifetime: Duration::from_secs(10),
        }));
        let sweeper = pool.start_sweeper();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(!sweeper.is_finished());
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn loop_exits_when_manager_dropped() {
        let pool = Arc::new(ClientManager::new(PoolSettings {
            lifetime: Duration::from_secs(10),
        }));
        let sweeper = pool.start_sweeper();
        drop(pool);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(sweeper.is_finished());
    }
}
