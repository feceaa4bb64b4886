//! ==============================================================================
//! aggregator.rs - frame aggregation window
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     some node firmwares print one field per line, others print all of them
//!     at once. the aggregator merges whatever arrives into a single window and
//!     emits a reading when either:
//!     - all eight canonical fields are present (flush right away), or
//!     - the window went quiet for longer than the idle timeout (partial flush)
//!
//! invariants:
//!     - exactly one window exists; flush() is the only emission point
//!     - the timestamp is taken at flush, not at first field arrival
//!
//! relationships:
//!     - used by: pipeline.rs (behind one mutex shared by read path and ticker)
//!     - consumes: parser::ParsedLine
//!     - produces: domain::Reading
//! ```
//!
//! ==============================================================================

use crate::domain::{timestamp_ms, Provenance, Reading, SensorFields};
use crate::parser::ParsedLine;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct FrameAggregator {
    window: SensorFields,
    source: Option<Provenance>,
    node: Option<u8>,
    last_update: Option<Instant>,
    idle_timeout: Duration,
}

impl FrameAggregator {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            window: SensorFields::default(),
            source: None,
            node: None,
            last_update: None,
            idle_timeout,
        }
    }

    /// merge a parsed line; returns the reading if the window became complete
    pub fn feed(&mut self, parsed: &ParsedLine, now: Instant) -> Option<Reading> {
        if parsed.is_empty() {
            return None;
        }
        self.expire_markers(now);
        self.window.merge(&parsed.fields);
        if parsed.source.is_some() {
            self.source = parsed.source;
        }
        if parsed.node.is_some() {
            self.node = parsed.node;
        }
        self.last_update = Some(now);

        if self.window.is_complete() {
            return self.flush();
        }
        None
    }

    /// flush a partial window that has been idle for longer than the timeout
    pub fn tick(&mut self, now: Instant) -> Option<Reading> {
        if !self.is_idle(now) {
            return None;
        }
        if self.window.is_empty() {
            self.expire_markers(now);
            return None;
        }
        tracing::debug!(
            "[AGGREGATOR] idle timeout, flushing {} of 8 fields",
            self.window.present_count()
        );
        self.flush()
    }

    /// stamp, hand out and clear the window; None when nothing was collected
    pub fn flush(&mut self) -> Option<Reading> {
        let fields = std::mem::take(&mut self.window);
        let source = self.source.take().unwrap_or_default();
        let node = self.node.take().unwrap_or(0);
        self.last_update = None;

        if fields.is_empty() {
            return None;
        }
        Some(Reading {
            fields,
            node,
            timestamp_ms: timestamp_ms(),
            source,
        })
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.last_update
            .is_some_and(|last| now.saturating_duration_since(last) > self.idle_timeout)
    }

    /// `Src:`/`Node:` markers seen without any field only describe the window
    /// that follows them; once that window went idle they are dropped
    fn expire_markers(&mut self, now: Instant) {
        if self.window.is_empty() && self.is_idle(now) {
            if self.source.is_some() || self.node.is_some() {
                tracing::debug!("[AGGREGATOR] dropping stale source/node markers");
            }
            self.source = None;
            self.node = None;
            self.last_update = None;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

impl Default for FrameAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}
