//! ==============================================================================
//! link/serial.rs - serial link over a real uart
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     opens the port 8N1 and pumps bytes from a dedicated reader thread.
//!     the thread sends with blocking_send, so a busy supervisor stops it
//!     from draining the uart.
//!
//! relationships:
//!     - used by: main.rs (through link::Supervisor)
//! ```
//!
//! ==============================================================================

use super::{Link, LinkEvent, LinkEvents, LinkHandle};
use crate::error::{HostError, Result};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// read timeout; also how quickly the reader notices close()
const READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_BUFFER_BYTES: usize = 256;

/// Opens the node's UART and pumps bytes from a dedicated reader thread
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialLink;

impl Link for SerialLink {
    fn open(&self, path: &str, baud_rate: u32, events: LinkEvents) -> Result<Box<dyn LinkHandle>> {
        if path.trim().is_empty() {
            return Err(HostError::Link("no device path configured".to_string()));
        }

        let mut port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;

        tracing::info!("Opened serial port: {} at {} baud", path, baud_rate);

        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = Arc::clone(&closed);
        let generation = events.generation();

        thread::Builder::new()
            .name(format!("serial-reader-{}", generation))
            .spawn(move || {
                let mut buffer = [0u8; READ_BUFFER_BYTES];
                while !reader_closed.load(Ordering::Relaxed) {
                    match port.read(&mut buffer) {
                        Ok(0) => {
                            events.blocking_send(LinkEvent::Closed);
                            break;
                        }
                        Ok(n) => {
                            // blocks when the pipeline is behind, pausing the uart
                            if !events.blocking_send(LinkEvent::Data(buffer[..n].to_vec())) {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            if !reader_closed.load(Ordering::Relaxed) {
                                events.blocking_send(LinkEvent::Error(e.to_string()));
                            }
                            break;
                        }
                    }
                }
                tracing::debug!("Serial reader {} exiting", generation);
            })?;

        Ok(Box::new(SerialHandle { closed }))
    }
}

struct SerialHandle {
    closed: Arc<AtomicBool>,
}

impl LinkHandle for SerialHandle {
    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl Drop for SerialHandle {
    fn drop(&mut self) {
        self.close();
    }
}
