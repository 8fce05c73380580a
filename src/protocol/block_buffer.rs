//! Block buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management.
//! Implements a state machine for handling fragmented blocks:
//! - `WaitingForHeader`: Need at least 20 bytes
//! - `WaitingForBody`: Header parsed, need payload + trailer bytes
//!
//! # Example
//!
//! ```ignore
//! use glusterfs_core::protocol::BlockBuffer;
//!
//! let mut buffer = BlockBuffer::new();
//!
//! // Data arrives in chunks from socket
//! let blocks = buffer.push(&chunk)?;
//!
//! for block in blocks {
//!     println!("Got block op={} callid={}", block.op, block.callid);
//! }
//! ```

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, TRAILER_SIZE};
use super::Block;
use crate::error::{GlusterError, Result};

/// State machine for block parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 20 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload and trailer bytes.
    WaitingForBody { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete blocks.
///
/// A decode error leaves the stream unsynchronised; callers should drop the
/// connection.
pub struct BlockBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl BlockBuffer {
    /// Create a new block buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 16MB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new block buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete blocks.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns error on a bad signature, unknown type, oversized payload or
    /// missing trailer.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Block>> {
        self.buffer.extend_from_slice(data);

        let mut blocks = Vec::new();
        while let Some(block) = self.try_extract_one()? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn try_extract_one(&mut self) -> Result<Option<Block>> {
        match &self.state {
            State::WaitingForHeader => {
                let header = match Header::decode(&self.buffer)? {
                    Some(header) => header,
                    None => return Ok(None),
                };
                header.validate(self.max_payload_size)?;

                let _ = self.buffer.split_to(HEADER_SIZE);
                self.state = State::WaitingForBody { header };

                self.try_extract_one()
            }

            State::WaitingForBody { header } => {
                let header = *header;
                let needed = header.size as usize + TRAILER_SIZE;
                if self.buffer.len() < needed {
                    return Ok(None);
                }

                let body = self.buffer.split_to(needed);
                self.state = State::WaitingForHeader;

                Block::from_parts(header, &body).map(Some).map_err(|e| match e {
                    GlusterError::Decode(msg) => {
                        GlusterError::Decode(format!("callid {}: {msg}", header.callid))
                    }
                    other => other,
                })
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check whether a block has been started but not completed.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForBody { .. })
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for BlockBuffer {
    fn default() -> Self {
        Self::new()
    }
}
