//! ==============================================================================
//! server.rs - read-only query and live stream api
//! ==============================================================================
//!
//! ```text
//! routes:
//!     GET /api/readings?limit=N   recent stored readings, newest first
//!     GET /api/status             link state, active store, subscriber count
//!     GET /api/stream             server-sent events (sensor-data, link-status)
//!     *                           json 404
//!
//!     the catch-all is registered with `.fallback()`, after the specific
//!     routes, so it can never shadow them.
//!
//! relationships:
//!     - used by: main.rs
//!     - reads: storage/router.rs, publisher.rs, link supervisor status
//! ```
//!
//! ==============================================================================

use crate::domain::StoredRecord;
use crate::link::LinkStatus;
use crate::publisher::FanOut;
use crate::storage::{Backend, PersistenceRouter};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const MAX_QUERY_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<PersistenceRouter>,
    pub fanout: FanOut,
    pub link_status: watch::Receiver<LinkStatus>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/readings", get(readings_handler))
        .route("/api/status", get(status_handler))
        .route("/api/stream", get(stream_handler))
        .fallback(not_found_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind_address: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!("[SERVER] api live at http://{}", bind_address);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// run the api on its own task; a bind or serve failure is logged and ends
/// only this task, the ingestion side keeps going
pub fn spawn_server(bind_address: String, state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run_server(&bind_address, state).await {
            tracing::error!("[SERVER] stopped, ingestion continues without the api: {:#}", e);
        }
    })
}

#[derive(Deserialize)]
struct ReadingsParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ReadingsResponse {
    source: Backend,
    records: Vec<StoredRecord>,
}

async fn readings_handler(
    State(state): State<AppState>,
    Query(params): Query<ReadingsParams>,
) -> Json<ReadingsResponse> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .clamp(1, MAX_QUERY_LIMIT);
    let (source, records) = state.router.query(limit).await;
    Json(ReadingsResponse { source, records })
}

#[derive(Serialize)]
struct StatusResponse {
    link: LinkStatus,
    store: Backend,
    buffered: usize,
    subscribers: usize,
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let link = state.link_status.borrow().clone();
    Json(StatusResponse {
        link,
        store: state.router.backend(),
        buffered: state.router.buffered(),
        subscribers: state.fanout.subscriber_count(),
    })
}

async fn stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let rx = state.fanout.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = SseEvent::default()
                        .event(&event.name)
                        .json_data(&event.payload);
                    match sse {
                        Ok(sse) => return Some((Ok::<_, Infallible>(sse), rx)),
                        Err(e) => tracing::debug!("[SERVER] unencodable event skipped: {}", e),
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("[SERVER] stream subscriber lagged, {} events skipped", missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "status": "error", "message": "not found" })),
    )
}
