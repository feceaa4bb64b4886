//! ==============================================================================
//! storage/router.rs - persistence router
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     decides where an accepted reading lives.
//!
//!     ┌──────────┐  save ok   ┌──────────────┐
//!     │ reading  │ ─────────> │ primary store│
//!     └────┬─────┘            └──────▲───────┘
//!          │ unreachable / timeout   │ bulk migration (once, on recovery)
//!          ▼                         │
//!     ┌──────────────────────────────┴┐
//!     │ fallback (fifo, cap 100)      │ ──> sensor_records.json
//!     └───────────────────────────────┘
//!
//!     a failed primary call flips the router into fallback mode. while in
//!     fallback mode every store() and every reconcile() first pings the
//!     primary; when it answers, the buffered records are written in one batch
//!     and the buffer is cleared only after that batch succeeded.
//!
//! relationships:
//!     - used by: pipeline.rs (store), server.rs (query), main.rs (reconcile timer)
//!     - uses: storage/fallback.rs, storage::PrimaryStore
//! ```
//!
//! ==============================================================================

use super::fallback::FallbackStore;
use super::PrimaryStore;
use crate::domain::{timestamp_ms, Reading, StoredRecord};
use crate::error::{HostError, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// which store is currently authoritative
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Primary,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoreOutcome {
    pub id: String,
    pub backend: Backend,
}

struct RouterState {
    backend: Backend,
    fallback: FallbackStore<StoredRecord>,
    next_seq: u64,
}

pub struct PersistenceRouter {
    primary: Option<Arc<dyn PrimaryStore>>,
    state: Mutex<RouterState>,
    // mirrors of `state` for status readers, written under the lock
    on_primary: AtomicBool,
    buffered: AtomicUsize,
    request_timeout: Duration,
}

impl PersistenceRouter {
    /// starts in fallback mode; the first store()/reconcile() pings the primary
    pub fn new(
        primary: Option<Arc<dyn PrimaryStore>>,
        fallback: FallbackStore<StoredRecord>,
        request_timeout: Duration,
    ) -> Self {
        let buffered = AtomicUsize::new(fallback.len());
        Self {
            primary,
            state: Mutex::new(RouterState {
                backend: Backend::Fallback,
                fallback,
                next_seq: 0,
            }),
            on_primary: AtomicBool::new(false),
            buffered,
            request_timeout,
        }
    }

    pub async fn store(&self, reading: &Reading) -> StoreOutcome {
        if self.backend() == Backend::Fallback {
            self.try_recover().await;
        }

        let mut state = self.state.lock().await;
        if state.backend == Backend::Primary {
            if let Some(primary) = &self.primary {
                match self.bounded(primary.save(reading)).await {
                    Ok(id) => {
                        return StoreOutcome {
                            id,
                            backend: Backend::Primary,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            "[STORE] primary save failed, switching to fallback: {}",
                            e
                        );
                        self.set_backend(&mut state, Backend::Fallback);
                    }
                }
            }
        }

        state.next_seq += 1;
        let id = format!("fb-{}-{}", timestamp_ms(), state.next_seq);
        let record = StoredRecord {
            id: id.clone(),
            reading: reading.clone(),
        };
        if let Some(evicted) = state.fallback.push(record) {
            tracing::debug!("[STORE] fallback full, evicted {}", evicted.id);
        }
        self.buffered.store(state.fallback.len(), Ordering::Relaxed);
        StoreOutcome {
            id,
            backend: Backend::Fallback,
        }
    }

    /// most recent first, from whichever store is authoritative
    pub async fn query(&self, limit: usize) -> (Backend, Vec<StoredRecord>) {
        if self.backend() == Backend::Primary {
            if let Some(primary) = &self.primary {
                match self.bounded(primary.query(limit)).await {
                    Ok(records) => return (Backend::Primary, records),
                    Err(e) => {
                        tracing::warn!("[STORE] primary query failed, serving fallback: {}", e);
                        let mut state = self.state.lock().await;
                        self.set_backend(&mut state, Backend::Fallback);
                    }
                }
            }
        }
        let state = self.state.lock().await;
        (Backend::Fallback, state.fallback.recent(limit))
    }

    /// ping the primary while in fallback mode; migrate if it came back
    pub async fn reconcile(&self) -> Backend {
        if self.backend() == Backend::Fallback {
            self.try_recover().await;
        }
        self.backend()
    }

    /// never waits on the state lock
    pub fn backend(&self) -> Backend {
        if self.on_primary.load(Ordering::Relaxed) {
            Backend::Primary
        } else {
            Backend::Fallback
        }
    }

    /// never waits on the state lock
    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    async fn try_recover(&self) {
        let Some(primary) = &self.primary else {
            return;
        };
        // ping without the lock: queries keep being served while it hangs
        if let Err(e) = self.bounded(primary.ping()).await {
            tracing::debug!("[STORE] primary still unavailable: {}", e);
            return;
        }

        let mut state = self.state.lock().await;
        if state.backend == Backend::Primary {
            // a concurrent caller already migrated
            return;
        }
        if !state.fallback.is_empty() {
            let readings: Vec<Reading> = state
                .fallback
                .records()
                .into_iter()
                .map(|r| r.reading)
                .collect();
            match self.bounded(primary.save_batch(&readings)).await {
                Ok(ids) => {
                    tracing::info!("[STORE] migrated {} fallback records to primary", ids.len());
                    state.fallback.clear();
                    self.buffered.store(0, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!("[STORE] fallback migration failed, will retry: {}", e);
                    return;
                }
            }
        }

        tracing::info!("[STORE] primary store available");
        self.set_backend(&mut state, Backend::Primary);
    }

    fn set_backend(&self, state: &mut RouterState, backend: Backend) {
        state.backend = backend;
        self.on_primary.store(backend == Backend::Primary, Ordering::Relaxed);
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| HostError::Timeout(self.request_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Provenance, SensorFields};
    use async_trait::async_trait;

    #[derive(Default)]
    struct FlakyStore {
        up: AtomicBool,
        saved: std::sync::Mutex<Vec<Reading>>,
        batches: AtomicUsize,
    }

    impl FlakyStore {
        fn check(&self) -> Result<()> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(HostError::PrimaryUnavailable)
            }
        }
    }

    #[async_trait]
    impl PrimaryStore for FlakyStore {
        async fn save(&self, reading: &Reading) -> Result<String> {
            self.check()?;
            let mut saved = self.saved.lock().unwrap();
            saved.push(reading.clone());
            Ok(format!("p{}", saved.len()))
        }

        async fn save_batch(&self, readings: &[Reading]) -> Result<Vec<String>> {
            self.check()?;
            self.batches.fetch_add(1, Ordering::SeqCst);
            let mut saved = self.saved.lock().unwrap();
            saved.extend(readings.iter().cloned());
            Ok(readings.iter().map(|_| "p".to_string()).collect())
        }

        async fn query(&self, limit: usize) -> Result<Vec<StoredRecord>> {
            self.check()?;
            let saved = self.saved.lock().unwrap();
            Ok(saved
                .iter()
                .rev()
                .take(limit)
                .enumerate()
                .map(|(i, r)| StoredRecord {
                    id: format!("p{}", i),
                    reading: r.clone(),
                })
                .collect())
        }

        async fn ping(&self) -> Result<()> {
            self.check()
        }
    }

    fn reading(soil: f64) -> Reading {
        Reading {
            fields: SensorFields {
                soil_moisture: Some(soil),
                ..Default::default()
            },
            node: 0,
            timestamp_ms: 0,
            source: Provenance::RealSensor,
        }
    }

    fn router(primary: Arc<FlakyStore>) -> PersistenceRouter {
        PersistenceRouter::new(
            Some(primary as Arc<dyn PrimaryStore>),
            FallbackStore::in_memory(100),
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    #[tokio::test]
    async fn unavailable_primary_goes_to_fallback() {
        let primary = Arc::new(FlakyStore::default());
        let router = router(primary.clone());

        let outcome = router.store(&reading(10.0)).await;
        assert_eq!(outcome.backend, Backend::Fallback);
        assert!(outcome.id.starts_with("fb-"));
        assert_eq!(router.buffered(), 1);

        let (backend, records) = router.query(10).await;
        assert_eq!(backend, Backend::Fallback);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn recovery_migrates_buffer_exactly_once() {
        let primary = Arc::new(FlakyStore::default());
        let router = router(primary.clone());

        for i in 0..7 {
            router.store(&reading(i as f64)).await;
        }
        assert_eq!(router.buffered(), 7);

        primary.up.store(true, Ordering::SeqCst);
        assert_eq!(router.reconcile().await, Backend::Primary);
        assert_eq!(router.buffered(), 0);
        assert_eq!(primary.saved.lock().unwrap().len(), 7);

        // further reconciles and stores never re-send the batch
        router.reconcile().await;
        let outcome = router.store(&reading(99.0)).await;
        assert_eq!(outcome.backend, Backend::Primary);
        assert_eq!(primary.batches.load(Ordering::SeqCst), 1);
        assert_eq!(primary.saved.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn migration_order_is_insertion_order() {
        let primary = Arc::new(FlakyStore::default());
        let router = router(primary.clone());
        for i in 0..3 {
            router.store(&reading(i as f64)).await;
        }
        primary.up.store(true, Ordering::SeqCst);
        router.reconcile().await;

        let soils: Vec<_> = primary
            .saved
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.fields.soil_moisture.unwrap())
            .collect();
        assert_eq!(soils, vec![0.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn primary_outage_flips_back_to_fallback() {
        let primary = Arc::new(FlakyStore::default());
        primary.up.store(true, Ordering::SeqCst);
        let router = router(primary.clone());

        assert_eq!(router.store(&reading(1.0)).await.backend, Backend::Primary);
        primary.up.store(false, Ordering::SeqCst);
        assert_eq!(router.store(&reading(2.0)).await.backend, Backend::Fallback);
        assert_eq!(router.backend(), Backend::Fallback);
    }

    #[tokio::test]
    async fn no_primary_means_fallback_forever() {
        let router =
            PersistenceRouter::new(None, FallbackStore::in_memory(2), DEFAULT_REQUEST_TIMEOUT);
        for i in 0..3 {
            router.store(&reading(i as f64)).await;
        }
        assert_eq!(router.reconcile().await, Backend::Fallback);
        let (_, records) = router.query(10).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reading.fields.soil_moisture, Some(2.0));
    }

    #[tokio::test]
    async fn query_reads_primary_while_it_is_authoritative() {
        let primary = Arc::new(FlakyStore::default());
        primary.up.store(true, Ordering::SeqCst);
        let router = router(primary.clone());
        for i in 0..3 {
            router.store(&reading(i as f64)).await;
        }

        let (backend, records) = router.query(2).await;
        assert_eq!(backend, Backend::Primary);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reading.fields.soil_moisture, Some(2.0));
        assert_eq!(records[1].reading.fields.soil_moisture, Some(1.0));
    }

    /// answers ping (unless told otherwise) but never finishes anything else
    struct HangingStore {
        hang_ping: bool,
    }

    #[async_trait]
    impl PrimaryStore for HangingStore {
        async fn save(&self, _reading: &Reading) -> Result<String> {
            std::future::pending().await
        }

        async fn save_batch(&self, _readings: &[Reading]) -> Result<Vec<String>> {
            std::future::pending().await
        }

        async fn query(&self, _limit: usize) -> Result<Vec<StoredRecord>> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<()> {
            if self.hang_ping {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn hanging(hang_ping: bool) -> PersistenceRouter {
        PersistenceRouter::new(
            Some(Arc::new(HangingStore { hang_ping }) as Arc<dyn PrimaryStore>),
            FallbackStore::in_memory(100),
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn hung_save_times_out_into_fallback() {
        let router = hanging(false);
        let started = tokio::time::Instant::now();

        let outcome = router.store(&reading(5.0)).await;
        assert_eq!(outcome.backend, Backend::Fallback);
        assert_eq!(router.backend(), Backend::Fallback);
        assert_eq!(router.buffered(), 1);
        assert!(started.elapsed() >= DEFAULT_REQUEST_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_primary_query_serves_fallback() {
        let router = hanging(false);
        assert_eq!(router.reconcile().await, Backend::Primary);

        let (backend, records) = router.query(10).await;
        assert_eq!(backend, Backend::Fallback);
        assert!(records.is_empty());
        assert_eq!(router.backend(), Backend::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn status_and_queries_stay_responsive_while_ping_hangs() {
        let router = Arc::new(hanging(true));
        let pending = tokio::spawn({
            let router = Arc::clone(&router);
            async move { router.store(&reading(1.0)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!pending.is_finished());

        assert_eq!(router.backend(), Backend::Fallback);
        assert_eq!(router.buffered(), 0);
        let query = tokio::time::timeout(Duration::from_millis(10), router.query(10)).await;
        assert!(query.is_ok());

        let outcome = pending.await.unwrap();
        assert_eq!(outcome.backend, Backend::Fallback);
        assert_eq!(router.buffered(), 1);
    }
}
