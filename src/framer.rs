//! ==============================================================================
//! framer.rs - line framing over the serial byte stream
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     the serial driver hands us chunks of whatever size the uart happened to
//!     deliver. this module turns them back into the text lines the node
//!     printed, carrying any incomplete tail over to the next chunk.
//!
//! relationships:
//!     - used by: link/supervisor.rs (one framer per supervisor, reset per link)
//!     - feeds: parser.rs (via pipeline.rs)
//! ```
//!
//! ==============================================================================

/// upper bound for the carry buffer when no terminator shows up
pub const MAX_CARRY_BYTES: usize = 4096;

#[derive(Debug, Default)]
pub struct LineFramer {
    carry: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// append a chunk and return every line it completed, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.carry[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.carry[start..end]));
            start = end + 1;
        }
        self.carry.drain(..start);

        // a node spewing bytes without newlines must not grow us forever
        if self.carry.len() > MAX_CARRY_BYTES {
            tracing::warn!(
                "[FRAMER] {} bytes without line terminator, emitting as one line",
                self.carry.len()
            );
            lines.push(decode_line(&self.carry));
            self.carry.clear();
        }

        lines
    }

    /// bytes waiting for their terminator
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// drop the carry buffer (a new link instance starts clean)
    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
