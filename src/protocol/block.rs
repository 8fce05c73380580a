//! Block struct: one request or reply on the wire.
//!
//! The codec never interprets the payload; it is normally a serialized
//! [`Dict`](super::Dict).
//!
//! # Example
//!
//! ```
//! use glusterfs_core::protocol::{Block, OpType};
//! use bytes::Bytes;
//!
//! let block = Block::new(OpType::FopRequest, 12, 7, Bytes::from_static(b"dict"));
//! let wire = block.serialize();
//! let decoded = Block::deserialize(&wire).unwrap();
//!
//! assert_eq!(decoded.callid, 7);
//! assert_eq!(decoded.payload(), b"dict");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{Header, OpType, HEADER_SIZE, TRAILER, TRAILER_SIZE};
use crate::error::{GlusterError, Result};

/// A complete protocol block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block type.
    pub op_type: OpType,
    /// Op-code.
    pub op: u16,
    /// Call id, echoed unchanged in the reply.
    pub callid: u64,
    /// Opaque payload (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Block {
    /// Create a new block.
    pub fn new(op_type: OpType, op: u16, callid: u64, payload: Bytes) -> Self {
        Self {
            op_type,
            op,
            callid,
            payload,
        }
    }

    /// Build the reply block for this request, carrying the same op and call id.
    pub fn reply(&self, payload: Bytes) -> Self {
        Self {
            op_type: self.op_type.reply(),
            op: self.op,
            callid: self.callid,
            payload,
        }
    }

    /// Header describing this block.
    #[inline]
    pub fn header(&self) -> Header {
        Header::new(self.op_type, self.op, self.callid, self.payload.len() as u32)
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total encoded size (header + payload + trailer).
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }

    /// Serialize into a single contiguous buffer.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.header().encode());
        buf.put_slice(&self.payload);
        buf.put_slice(&TRAILER);
        buf.freeze()
    }

    /// Deserialize exactly one block from `buf`.
    ///
    /// Truncated input, a size running past the buffer, a missing trailer
    /// and trailing bytes are all decode errors.
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        let header = Header::decode(buf)?.ok_or_else(|| {
            GlusterError::Decode(format!(
                "Truncated header: {} of {} bytes",
                buf.len(),
                HEADER_SIZE
            ))
        })?;

        let total = header.block_len();
        if buf.len() < total {
            return Err(GlusterError::Decode(format!(
                "Declared size {} exceeds available {} bytes",
                header.size,
                buf.len().saturating_sub(HEADER_SIZE + TRAILER_SIZE)
            )));
        }
        if buf.len() > total {
            return Err(GlusterError::Decode(format!(
                "{} trailing bytes after block",
                buf.len() - total
            )));
        }

        Self::from_parts(header, &buf[HEADER_SIZE..])
    }

    /// Assemble a block from a decoded header and `payload + trailer` bytes.
    pub(crate) fn from_parts(header: Header, body: &[u8]) -> Result<Self> {
        let size = header.size as usize;
        if body.len() < size + TRAILER_SIZE {
            return Err(GlusterError::Decode("Truncated block body".to_string()));
        }
        if body[size..size + TRAILER_SIZE] != TRAILER {
            return Err(GlusterError::Decode("Missing block trailer".to_string()));
        }
        Ok(Self {
            op_type: header.op_type,
            op: header.op,
            callid: header.callid,
            payload: Bytes::copy_from_slice(&body[..size]),
        })
    }
}
