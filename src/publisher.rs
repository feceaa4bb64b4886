//! ==============================================================================
//! publisher.rs - live fan-out to subscribers
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     every flushed reading (genuine or not) is pushed to whoever is watching:
//!     dashboards on the sse stream, tests, future bridges.
//!
//! delivery:
//!     backed by a tokio broadcast channel. send never waits on receivers:
//!     - no subscribers: the event is simply dropped
//!     - slow subscriber: it lags and skips the oldest events, nobody else notices
//!     - each subscriber sees events in publish order
//!
//! relationships:
//!     - used by: pipeline.rs (sensor-data), link/supervisor.rs (link-status)
//!     - read by: server.rs (/api/stream)
//! ```
//!
//! ==============================================================================

use serde::Serialize;
use tokio::sync::broadcast;

pub const SENSOR_DATA_EVENT: &str = "sensor-data";
pub const LINK_STATUS_EVENT: &str = "link-status";

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// fire-and-forget broadcast seam
pub trait Publisher: Send + Sync {
    fn broadcast(&self, event: &str, payload: serde_json::Value);
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    pub name: String,
    pub payload: serde_json::Value,
}

#[derive(Clone)]
pub struct FanOut {
    tx: broadcast::Sender<Event>,
}

impl FanOut {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Publisher for FanOut {
    fn broadcast(&self, event: &str, payload: serde_json::Value) {
        let event = Event {
            name: event.to_string(),
            payload,
        };
        // Err only means nobody is listening right now
        if let Ok(n) = self.tx.send(event) {
            tracing::trace!("[PUBLISH] delivered to {} subscribers", n);
        }
    }
}
