//! ==============================================================================
//! storage/remote.rs - http document store (primary)
//! ==============================================================================
//!
//! ```text
//! wire contract (json):
//!     GET  {base}/health              any 2xx
//!     POST {base}/readings            reading          -> {"id": "..."}
//!     POST {base}/readings/batch      [reading, ...]   -> {"ids": ["..."]}
//!     GET  {base}/readings?limit=N    [{"id": "...", ...reading}], newest first
//!
//!     connect failures and timeouts surface as PrimaryUnavailable, which is
//!     what sends the router into fallback mode.
//!
//! relationships:
//!     - used by: main.rs (wrapped by storage/router.rs)
//! ```
//!
//! ==============================================================================

use super::PrimaryStore;
use crate::domain::{Reading, StoredRecord};
use crate::error::{HostError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct SavedId {
    id: String,
}

#[derive(Deserialize)]
struct SavedIds {
    ids: Vec<String>,
}

pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostError::Primary(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl PrimaryStore for RemoteStore {
    async fn save(&self, reading: &Reading) -> Result<String> {
        let saved: SavedId = self
            .client
            .post(self.url("readings"))
            .json(reading)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(saved.id)
    }

    async fn save_batch(&self, readings: &[Reading]) -> Result<Vec<String>> {
        let saved: SavedIds = self
            .client
            .post(self.url("readings/batch"))
            .json(readings)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if saved.ids.len() != readings.len() {
            return Err(HostError::Primary(format!(
                "batch stored {} of {} readings",
                saved.ids.len(),
                readings.len()
            )));
        }
        Ok(saved.ids)
    }

    async fn query(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        let records = self
            .client
            .get(self.url("readings"))
            .query(&[("limit", limit)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(records)
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .get(self.url("health"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Provenance, SensorFields};
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// minimal document store speaking the wire contract above
    #[derive(Clone, Default)]
    struct StubStore {
        docs: Arc<Mutex<Vec<Value>>>,
        short_batch: bool,
    }

    impl StubStore {
        fn insert(&self, mut doc: Value) -> String {
            let mut docs = self.docs.lock().unwrap();
            let id = format!("doc-{}", docs.len() + 1);
            doc["id"] = id.clone().into();
            docs.push(doc);
            id
        }
    }

    fn stub_app(stub: StubStore) -> Router {
        Router::new()
            .route("/health", get(|| async { StatusCode::OK }))
            .route(
                "/readings",
                post(|State(stub): State<StubStore>, Json(doc): Json<Value>| async move {
                    Json(json!({ "id": stub.insert(doc) }))
                })
                .get(
                    |State(stub): State<StubStore>,
                     Query(params): Query<HashMap<String, usize>>| async move {
                        let limit = params.get("limit").copied().unwrap_or(usize::MAX);
                        let docs = stub.docs.lock().unwrap();
                        Json(docs.iter().rev().take(limit).cloned().collect::<Vec<_>>())
                    },
                ),
            )
            .route(
                "/readings/batch",
                post(|State(stub): State<StubStore>, Json(docs): Json<Vec<Value>>| async move {
                    let mut ids: Vec<String> = docs.into_iter().map(|d| stub.insert(d)).collect();
                    if stub.short_batch {
                        ids.pop();
                    }
                    Json(json!({ "ids": ids }))
                }),
            )
            .with_state(stub)
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn reading(soil: f64) -> Reading {
        Reading {
            fields: SensorFields {
                soil_moisture: Some(soil),
                temperature_ds: Some(21.0),
                ..Default::default()
            },
            node: 1,
            timestamp_ms: 1_700_000_000_000,
            source: Provenance::RealSensor,
        }
    }

    #[tokio::test]
    async fn save_query_and_batch_follow_wire_contract() {
        let stub = StubStore::default();
        let base = serve(stub_app(stub.clone())).await;
        // trailing slash is tolerated
        let store = RemoteStore::new(&format!("{}/", base), Duration::from_secs(2)).unwrap();

        store.ping().await.unwrap();
        assert_eq!(store.save(&reading(10.0)).await.unwrap(), "doc-1");
        let ids = store
            .save_batch(&[reading(11.0), reading(12.0)])
            .await
            .unwrap();
        assert_eq!(ids, vec!["doc-2", "doc-3"]);

        let posted = stub.docs.lock().unwrap()[0].clone();
        assert_eq!(posted["soil_moisture"], 10.0);
        assert_eq!(posted["source"], "real_sensor");
        assert_eq!(posted["node"], 1);

        let records = store.query(2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "doc-3");
        assert_eq!(records[0].reading.fields.soil_moisture, Some(12.0));
        assert_eq!(records[1].id, "doc-2");
    }

    #[tokio::test]
    async fn short_batch_acknowledgement_is_an_error() {
        let stub = StubStore {
            short_batch: true,
            ..Default::default()
        };
        let base = serve(stub_app(stub)).await;
        let store = RemoteStore::new(&base, Duration::from_secs(2)).unwrap();

        let result = store.save_batch(&[reading(1.0), reading(2.0)]).await;
        match result {
            Err(HostError::Primary(message)) => assert!(message.contains("1 of 2")),
            other => panic!("expected a primary error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn refused_connection_means_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = RemoteStore::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        assert!(matches!(store.ping().await, Err(HostError::PrimaryUnavailable)));
        assert!(matches!(
            store.save(&reading(1.0)).await,
            Err(HostError::PrimaryUnavailable)
        ));
    }

    #[tokio::test]
    async fn slow_store_times_out_as_unavailable() {
        let app = Router::new().route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );
        let base = serve(app).await;
        let store = RemoteStore::new(&base, Duration::from_millis(100)).unwrap();
        assert!(matches!(store.ping().await, Err(HostError::PrimaryUnavailable)));
    }

    #[tokio::test]
    async fn error_status_is_a_primary_error() {
        let app = Router::new().route(
            "/readings",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = serve(app).await;
        let store = RemoteStore::new(&base, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            store.save(&reading(1.0)).await,
            Err(HostError::Primary(_))
        ));
    }
}
