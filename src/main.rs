//! ==============================================================================
//! main.rs - telemetry host entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the ingestion pipeline, the storage router and the api together
//!     and keeps them running until ctrl-c.
//!
//! responsibilities:
//!     - load host.toml (or defaults) and set up tracing
//!     - open the fallback snapshot and the optional primary store
//!     - supervise the serial link to the sensor node
//!     - flush partial readings on the idle ticker
//!     - periodically reconcile fallback records into the primary store
//!     - serve /api/readings, /api/status and /api/stream
//!
//! relationships:
//!     - uses: config.rs, link/, pipeline.rs, storage/, publisher.rs, server.rs
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                     rust host (this file)                     │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//!     │  │ supervisor  │  │ idle ticker │  │ reconcile timer      │  │
//!     │  │ (serial)    │  │ (1s)        │  │ (primary recovery)   │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬───────────┘  │
//!     │         └────────────────┼────────────────────┘              │
//!     │                    ┌─────┴─────┐        ┌─────────────┐      │
//!     │                    │ pipeline  │ ─────> │ web server  │      │
//!     │                    └───────────┘ fanout │ (port 3000) │      │
//!     │                                         └─────────────┘      │
//!     └──────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use telemetry_host::aggregator::FrameAggregator;
use telemetry_host::config::{ConfigOrigin, HostConfig};
use telemetry_host::domain::StoredRecord;
use telemetry_host::link::{LinkStatus, SerialLink, Supervisor, SupervisorConfig};
use telemetry_host::pipeline::IngestPipeline;
use telemetry_host::publisher::{FanOut, Publisher};
use telemetry_host::server::{spawn_server, AppState};
use telemetry_host::storage::fallback::SENSOR_SNAPSHOT_FILE;
use telemetry_host::storage::{FallbackStore, PersistenceRouter, PrimaryStore, RemoteStore};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: configuration, then logging (RUST_LOG wins over host.toml)
    let (config, origin) = HostConfig::load_or_default();
    init_tracing(&config.logging.level);

    tracing::info!("===========================================================");
    tracing::info!("  Telemetry Host - serial sensor ingestion");
    tracing::info!("===========================================================");
    match &origin {
        ConfigOrigin::File(path) => tracing::info!("[CONFIG] loaded from {}", path.display()),
        ConfigOrigin::Defaults => tracing::info!("[CONFIG] no host.toml found, using defaults"),
        ConfigOrigin::Rejected { path, error } => {
            tracing::warn!("[CONFIG] ignoring {}: {}; using defaults", path.display(), error)
        }
    }
    config.log_summary();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // step 2: storage
    let router = Arc::new(build_router(&config));
    let backend = router.reconcile().await;
    tracing::info!(
        "[STARTUP] ✓ storage ready ({:?}, {} buffered)",
        backend,
        router.buffered()
    );

    // step 3: ingestion pipeline
    let fanout = FanOut::new(config.publisher.channel_capacity);
    let publisher: Arc<dyn Publisher> = Arc::new(fanout.clone());
    let pipeline = Arc::new(
        IngestPipeline::new(
            FrameAggregator::new(config.idle_timeout()),
            router.clone(),
            publisher,
        )
        .with_show_data(config.logging.show_sensor_data),
    );
    let ticker = pipeline
        .clone()
        .spawn_ticker(config.tick_interval(), shutdown_rx.clone());
    let reconciler = spawn_reconciler(
        router.clone(),
        config.reconcile_interval(),
        shutdown_rx.clone(),
    );

    // step 4: serial link
    let (link_status, supervisor) = if config.serial.device_path.trim().is_empty() {
        tracing::warn!("[STARTUP] no serial device configured, running without a link");
        let (_tx, rx) = watch::channel(LinkStatus::unconfigured("no serial device configured"));
        (rx, None)
    } else {
        let supervisor = Supervisor::new(
            SerialLink,
            SupervisorConfig {
                device_path: config.serial.device_path.clone(),
                baud_rate: config.serial.baud_rate,
                policy: config.reconnect_policy(),
            },
            pipeline.clone(),
        );
        let status = supervisor.status();
        (status, Some(tokio::spawn(supervisor.run(shutdown_rx.clone()))))
    };

    // step 5: api on its own task; losing it must not stop ingestion
    let state = AppState {
        router: router.clone(),
        fanout,
        link_status,
    };
    let server = spawn_server(config.server.bind_address.clone(), state);

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("[SHUTDOWN] ctrl-c received"),
        Err(e) => tracing::error!("[SHUTDOWN] cannot listen for ctrl-c ({}), stopping", e),
    }

    // step 6: orderly stop, link first so no new lines arrive mid-flush
    shutdown_tx.send_replace(true);
    if let Some(handle) = supervisor {
        handle.await.ok();
    }
    ticker.await.ok();
    reconciler.await.ok();
    server.abort();
    if let Some(dispatch) = pipeline.flush_pending().await {
        tracing::info!(
            "[SHUTDOWN] flushed partial reading ({} fields)",
            dispatch.reading.fields.present_count()
        );
    }
    tracing::info!("[SHUTDOWN] done ({} records buffered)", router.buffered());
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_router(config: &HostConfig) -> PersistenceRouter {
    let capacity = config.storage.fallback_capacity;
    let snapshot = config.storage.snapshot_dir.join(SENSOR_SNAPSHOT_FILE);
    let fallback = match FallbackStore::<StoredRecord>::open_or_quarantine(capacity, &snapshot) {
        Ok(store) => {
            tracing::info!(
                "[STARTUP] ✓ fallback snapshot {} ({} records restored)",
                snapshot.display(),
                store.len()
            );
            store
        }
        Err(e) => {
            tracing::warn!(
                "[STARTUP] fallback snapshot {} unusable ({}), records kept in memory only",
                snapshot.display(),
                e
            );
            FallbackStore::in_memory(capacity)
        }
    };

    let primary: Option<Arc<dyn PrimaryStore>> = match &config.storage.primary_url {
        Some(url) => match RemoteStore::new(url, config.request_timeout()) {
            Ok(store) => Some(Arc::new(store) as Arc<dyn PrimaryStore>),
            Err(e) => {
                tracing::warn!("[STARTUP] primary store {} disabled: {}", url, e);
                None
            }
        },
        None => None,
    };

    PersistenceRouter::new(primary, fallback, config.request_timeout())
}

fn spawn_reconciler(
    router: Arc<PersistenceRouter>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately and startup already reconciled
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    router.reconcile().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}
