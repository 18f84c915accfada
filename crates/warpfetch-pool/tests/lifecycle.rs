//! Pool lifecycle: share, idle out, rebuild.
//!
//! Runs with paused time so the sweeper's lifetime interval elapses
//! instantly and deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use warpfetch_core::{ClientConfiguration, FetchConfig, FetchError};
use warpfetch_pool::{
    ClientManager, ConnectFuture, EventLoopGroup, ShutdownFuture, TransportClient,
    TransportProvider,
};

// ── Tracing setup ───────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=warpfetch_pool=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Transport double ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FakeClient {
    running: AtomicBool,
    closed: AtomicBool,
}

impl TransportClient for FakeClient {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> ShutdownFuture<'_> {
        Box::pin(async move {
            if self.running.load(Ordering::SeqCst) {
                return Err(FetchError::Shutdown("request in flight".into()));
            }
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Default)]
struct FakeTransport {
    built: AtomicUsize,
    clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeTransport {
    fn client(&self, index: usize) -> Arc<FakeClient> {
        self.clients.lock().unwrap()[index].clone()
    }
}

impl TransportProvider for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    fn connect<'a>(
        &'a self,
        group: Arc<EventLoopGroup>,
        _configuration: &'a ClientConfiguration,
    ) -> ConnectFuture<'a> {
        Box::pin(async move {
            // Construction takes a while, as a TLS handshake would.
            group.spawn(tokio::time::sleep(Duration::from_millis(50))).await.ok();
            self.built.fetch_add(1, Ordering::SeqCst);
            let client = Arc::new(FakeClient::default());
            self.clients.lock().unwrap().push(client.clone());
            let client: Arc<dyn TransportClient> = client;
            Ok(client)
        })
    }
}

fn pool_from_toml(doc: &str) -> Arc<ClientManager> {
    let config: FetchConfig = toml::from_str(doc).unwrap();
    Arc::new(ClientManager::from_config(&config).unwrap())
}

const CONFIG: &str = r#"
[pool]
lifetime = "60s"

[[clients]]
host = "x"
timeout = "5s"
"#;

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn share_idle_out_and_rebuild() {
    init_tracing();
    let config: FetchConfig = toml::from_str(CONFIG).unwrap();
    let client_config = config.client_configurations().unwrap().remove(0);
    assert_eq!(client_config.timeout, Duration::from_secs(5));

    let pool = pool_from_toml(CONFIG);
    let transport = Arc::new(FakeTransport::default());
    let sweeper = pool.start_sweeper();

    let (first, second) = tokio::join!(
        pool.client(transport.as_ref(), &client_config),
        pool.client(transport.as_ref(), &client_config),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first, second);
    assert_eq!(transport.built.load(Ordering::SeqCst), 1);

    // Two sweep intervals: the first finds the client idle for less than a
    // full lifetime, the second evicts it.
    tokio::time::sleep(Duration::from_secs(121)).await;
    assert_eq!(pool.stats().await.entries, 0);
    assert!(transport.client(0).closed.load(Ordering::SeqCst));

    let third = pool.client(transport.as_ref(), &client_config).await.unwrap();
    assert_ne!(third, first);
    assert_eq!(transport.built.load(Ordering::SeqCst), 2);
    assert_eq!(pool.stats().await.constructed, 2);

    pool.log_stats().await;
    sweeper.stop().await;
}

#[tokio::test(start_paused = true)]
async fn busy_client_survives_sweeps() {
    init_tracing();
    let pool = pool_from_toml("[pool]\nlifetime = \"10s\"\n");
    let transport = FakeTransport::default();
    let sweeper = pool.start_sweeper();

    let config = ClientConfiguration::new("busy.example");
    let handle = pool.client(&transport, &config).await.unwrap();
    transport.client(0).running.store(true, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(pool.stats().await.entries, 1);

    // The request finishes; one lifetime later the client is gone.
    transport.client(0).running.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(pool.stats().await.entries, 0);
    assert!(!handle.is_running());

    sweeper.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_caller_does_not_wedge_the_pool() {
    init_tracing();
    let pool = pool_from_toml("");
    let transport = Arc::new(FakeTransport::default());
    let config = ClientConfiguration::new("slow.example");

    // Give up while construction is still in progress.
    let cancelled = tokio::time::timeout(
        Duration::from_millis(10),
        pool.client(transport.as_ref(), &config),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(pool.stats().await.entries, 0);

    let handle = tokio::time::timeout(
        Duration::from_secs(1),
        pool.client(transport.as_ref(), &config),
    )
    .await
    .expect("pool lock leaked by cancelled caller")
    .unwrap();
    assert!(!handle.is_running());
    assert_eq!(pool.shutdown_all().await, 0);
}
