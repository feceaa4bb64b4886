//! ==============================================================================
//! link/mod.rs - link layer
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     the serial connection to the sensor node and its supervisor.
//!     `Link` opens an instance, `LinkHandle` closes it, and every event the
//!     instance reports is tagged with its generation.
//!
//! relationships:
//!     - implemented by: link/serial.rs (and test doubles)
//!     - driven by: link/supervisor.rs
//! ```
//!
//! ==============================================================================

use crate::error::Result;
use tokio::sync::mpsc;

pub mod serial;
pub mod state;
pub mod supervisor;

pub use serial::SerialLink;
pub use state::{LinkState, LinkStateMachine, LinkStatus, ReconnectPolicy, RetryKind, RetryTimer};
pub use supervisor::{Supervisor, SupervisorConfig};

/// what a link instance reports back
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Data(Vec<u8>),
    Error(String),
    Closed,
}

/// event sink handed to one link instance, tagged with its generation
#[derive(Clone)]
pub struct LinkEvents {
    generation: u64,
    tx: mpsc::Sender<(u64, LinkEvent)>,
}

impl LinkEvents {
    pub fn new(generation: u64, tx: mpsc::Sender<(u64, LinkEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// from a reader thread; blocks while the supervisor is busy (back-pressure).
    /// false once the supervisor is gone.
    pub fn blocking_send(&self, event: LinkEvent) -> bool {
        self.tx.blocking_send((self.generation, event)).is_ok()
    }

    /// from async code
    pub async fn send(&self, event: LinkEvent) -> bool {
        self.tx.send((self.generation, event)).await.is_ok()
    }
}

/// something that can open the physical link
pub trait Link: Send + Sync {
    fn open(&self, path: &str, baud_rate: u32, events: LinkEvents) -> Result<Box<dyn LinkHandle>>;
}

/// an open link instance
pub trait LinkHandle: Send {
    /// stop reading; safe to call more than once
    fn close(&mut self);
}
