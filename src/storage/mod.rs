//! ==============================================================================
//! storage/mod.rs - persistence
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     the primary store seam, the bounded fallback and the router that
//!     moves readings between them.
//!
//! relationships:
//!     - used by: pipeline.rs, server.rs, main.rs
//! ```
//!
//! ==============================================================================

use crate::domain::{Reading, StoredRecord};
use crate::error::Result;
use async_trait::async_trait;

pub mod fallback;
pub mod remote;
pub mod router;

pub use fallback::FallbackStore;
pub use remote::RemoteStore;
pub use router::{Backend, PersistenceRouter, StoreOutcome};

/// the durable store; the router does not care what sits behind it
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// persist one reading and return the id the store assigned
    async fn save(&self, reading: &Reading) -> Result<String>;

    /// persist many readings in one request (fallback migration)
    async fn save_batch(&self, readings: &[Reading]) -> Result<Vec<String>>;

    /// most recent first
    async fn query(&self, limit: usize) -> Result<Vec<StoredRecord>>;

    /// cheap reachability check
    async fn ping(&self) -> Result<()>;
}
