//! ==============================================================================
//! pipeline.rs - ingest pipeline
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     the synchronous per-reading chain behind the link:
//!
//!         line -> parser -> aggregator -> classifier -> router -> publisher
//!
//!     the aggregation window is shared by two callers, the read path
//!     (handle_line) and the idle ticker (tick). both go through the same
//!     mutex, so a timeout flush never sees a half-merged window.
//!
//! relationships:
//!     - used by: link/supervisor.rs (handle_line), main.rs (spawn_ticker)
//!     - uses: parser.rs, aggregator.rs, classifier.rs, storage/, publisher.rs
//! ```
//!
//! ==============================================================================

use crate::aggregator::FrameAggregator;
use crate::classifier::{classify, Verdict};
use crate::domain::Reading;
use crate::parser::parse_line;
use crate::publisher::{Publisher, SENSOR_DATA_EVENT};
use crate::storage::{PersistenceRouter, StoreOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// what happened to one flushed reading
#[derive(Clone, Debug, Serialize)]
pub struct Dispatch {
    pub reading: Reading,
    pub verdict: Verdict,
    /// None when the classifier kept it out of storage
    pub stored: Option<StoreOutcome>,
}

pub struct IngestPipeline {
    aggregator: Mutex<FrameAggregator>,
    router: Arc<PersistenceRouter>,
    publisher: Arc<dyn Publisher>,
    show_data: bool,
}

impl IngestPipeline {
    pub fn new(
        aggregator: FrameAggregator,
        router: Arc<PersistenceRouter>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            aggregator: Mutex::new(aggregator),
            router,
            publisher,
            show_data: false,
        }
    }

    /// log every dispatched reading at info level
    pub fn with_show_data(mut self, show_data: bool) -> Self {
        self.show_data = show_data;
        self
    }

    pub fn router(&self) -> &Arc<PersistenceRouter> {
        &self.router
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    /// feed one framed line; returns the dispatch if it completed a reading
    pub async fn handle_line(&self, line: &str) -> Option<Dispatch> {
        let parsed = parse_line(line);
        if parsed.is_empty() {
            if !line.trim().is_empty() {
                tracing::debug!("[INGEST] ignoring non-data line: {:?}", line);
            }
            return None;
        }

        let reading = {
            let mut aggregator = self.aggregator.lock().await;
            aggregator.feed(&parsed, Instant::now())
        }?;
        Some(self.dispatch(reading).await)
    }

    /// idle-timeout check, driven by the ticker
    pub async fn tick(&self, now: Instant) -> Option<Dispatch> {
        let reading = {
            let mut aggregator = self.aggregator.lock().await;
            aggregator.tick(now)
        }?;
        Some(self.dispatch(reading).await)
    }

    /// emit whatever is accumulated without waiting for the idle timeout
    pub async fn flush_pending(&self) -> Option<Dispatch> {
        let reading = {
            let mut aggregator = self.aggregator.lock().await;
            aggregator.flush()
        }?;
        Some(self.dispatch(reading).await)
    }

    /// classify, store if genuine, then publish regardless
    pub async fn dispatch(&self, reading: Reading) -> Dispatch {
        let verdict = classify(&reading);

        let stored = if verdict.genuine {
            Some(self.router.store(&reading).await)
        } else {
            tracing::info!(
                "[INGEST] reading not stored (shown live only): {:?}",
                verdict.rejections
            );
            None
        };

        if self.show_data {
            let f = &reading.fields;
            tracing::info!(
                "[SENSOR] node {} | soil {:?}% | T1 {:?}C | T2 {:?}C | P {:?}hPa | air {:?}% | light {:?}lx | rain {:?}% | alert {:?}",
                reading.node,
                f.soil_moisture,
                f.temperature_ds,
                f.temperature_bme,
                f.pressure,
                f.air_humidity,
                f.light,
                f.rain,
                f.rain_digital
            );
        }

        let mut payload = serde_json::to_value(&reading).unwrap_or_default();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("genuine".to_string(), verdict.genuine.into());
            if let Some(outcome) = &stored {
                obj.insert("id".to_string(), outcome.id.clone().into());
            }
        }
        self.publisher.broadcast(SENSOR_DATA_EVENT, payload);

        Dispatch {
            reading,
            verdict,
            stored,
        }
    }

    /// run tick() on a fixed interval until shutdown flips
    pub fn spawn_ticker(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick(Instant::now()).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("[INGEST] ticker stopped");
        })
    }
}
