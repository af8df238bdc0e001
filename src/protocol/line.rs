//! Line framing for stream transports.
//!
//! Serial scales print one reading per line. The stream is split on CR
//! and LF; empty lines are skipped:
//! ```text
//! ┌──────────────────────┬────────────┐
//! │  ST,GS,+  2.350kg    │  \r\n      │
//! └──────────────────────┴────────────┘
//! ```

use bytes::{Buf, Bytes, BytesMut};

/// Default maximum line length before a forced flush.
pub const DEFAULT_MAX_LINE: usize = 256;

/// Line decoder that handles partial data.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: BytesMut,
    max_line: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

impl LineDecoder {
    /// Creates a new line decoder.
    #[must_use]
    pub fn new(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_line),
            max_line: max_line.max(1),
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete line without its terminator.
    ///
    /// A buffer that grows past the maximum line length without a
    /// terminator is flushed as a line of exactly `max_line` bytes, so a
    /// device that never sends terminators still produces frames.
    pub fn next_line(&mut self) -> Option<Bytes> {
        loop {
            let Some(end) = self.buffer.iter().position(|&b| b == b'\r' || b == b'\n') else {
                if self.buffer.len() >= self.max_line {
                    tracing::trace!("flushing unterminated line of {} bytes", self.max_line);
                    return Some(self.buffer.split_to(self.max_line).freeze());
                }
                return None;
            };

            let line = self.buffer.split_to(end).freeze();
            self.buffer.advance(1);

            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
