//! ==============================================================================
//! lib.rs - telemetry host library
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     everything between the serial cable and the http api, split so the
//!     binary (main.rs) only wires things together and tests can drive each
//!     stage without hardware.
//!
//! data flow:
//!
//!     serial bytes ─> framer ─> parser ─> aggregator ─> classifier
//!                                                          │
//!                                   ┌──────────────────────┤
//!                                   ▼                      ▼
//!                          storage router            publisher (fan-out)
//!                         (primary | fallback)        sensor-data events
//!
//!     link/ owns the port lifecycle and feeds framed lines into pipeline.rs.
//! ```
//!
//! ==============================================================================

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod error;
pub mod framer;
pub mod link;
pub mod parser;
pub mod pipeline;
pub mod publisher;
pub mod server;
pub mod storage;

pub use error::{HostError, Result};
