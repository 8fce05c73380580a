//! Wire format encoding and decoding.
//!
//! Implements the 20-byte block header followed by the payload and a
//! 2-byte trailer:
//! ```text
//! ┌───────────┬─────────┬─────────┬──────────┬──────────┬─────────┬─────────┐
//! │ Signature │ Type    │ Op      │ Call ID  │ Size     │ Payload │ Trailer │
//! │ 4 bytes   │ 2 bytes │ 2 bytes │ 8 bytes  │ 4 bytes  │ N bytes │ ";o"    │
//! │ uint32 BE │ u16 BE  │ u16 BE  │ u64 BE   │ u32 BE   │         │         │
//! └───────────┴─────────┴─────────┴──────────┴──────────┴─────────┴─────────┘
//! ```
//!
//! The signature packs the ":O" magic with the protocol version in the low
//! byte. All multi-byte integers are Big Endian.

use crate::error::{GlusterError, Result};

/// Header size in bytes (fixed, exactly 20).
pub const HEADER_SIZE: usize = 20;

/// Trailer closing every block.
pub const TRAILER: [u8; 2] = *b";o";

/// Trailer size in bytes.
pub const TRAILER_SIZE: usize = TRAILER.len();

/// Protocol version carried in the low byte of the signature.
pub const PROTOCOL_VERSION: u8 = 0x13;

/// ":O" magic, shifted above the version byte.
pub const HEADER_MAGIC: u32 = 0x3A4F00;

/// Full signature word: magic and version.
pub const SIGNATURE: u32 = (HEADER_MAGIC << 8) | PROTOCOL_VERSION as u32;

/// Default maximum payload size (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Kind of block: which table the op-code indexes and which direction it flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpType {
    /// Filesystem operation request.
    FopRequest = 1,
    /// Filesystem operation reply.
    FopReply = 2,
    /// Management operation request.
    MgmtRequest = 3,
    /// Management operation reply.
    MgmtReply = 4,
    /// Callback request (reserved, no handlers).
    CbkRequest = 5,
    /// Callback reply.
    CbkReply = 6,
}

impl OpType {
    /// Decode a wire type value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(OpType::FopRequest),
            2 => Some(OpType::FopReply),
            3 => Some(OpType::MgmtRequest),
            4 => Some(OpType::MgmtReply),
            5 => Some(OpType::CbkRequest),
            6 => Some(OpType::CbkReply),
            _ => None,
        }
    }

    /// Wire value.
    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Check if this is a request type.
    #[inline]
    pub fn is_request(self) -> bool {
        matches!(
            self,
            OpType::FopRequest | OpType::MgmtRequest | OpType::CbkRequest
        )
    }

    /// Reply type paired with this request type. Reply types map to themselves.
    pub fn reply(self) -> Self {
        match self {
            OpType::FopRequest | OpType::FopReply => OpType::FopReply,
            OpType::MgmtRequest | OpType::MgmtReply => OpType::MgmtReply,
            OpType::CbkRequest | OpType::CbkReply => OpType::CbkReply,
        }
    }
}

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Block type.
    pub op_type: OpType,
    /// Op-code within the type's table.
    pub op: u16,
    /// Call id correlating request and reply.
    pub callid: u64,
    /// Payload length in bytes (trailer excluded).
    pub size: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(op_type: OpType, op: u16, callid: u64, size: u32) -> Self {
        Self {
            op_type,
            op,
            callid,
            size,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use glusterfs_core::protocol::{Header, OpType};
    ///
    /// let header = Header::new(OpType::FopRequest, 12, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 20);
    /// assert_eq!(&bytes[..3], &[0x3A, 0x4F, 0x00]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (20 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&SIGNATURE.to_be_bytes());
        buf[4..6].copy_from_slice(&self.op_type.as_u16().to_be_bytes());
        buf[6..8].copy_from_slice(&self.op.to_be_bytes());
        buf[8..16].copy_from_slice(&self.callid.to_be_bytes());
        buf[16..20].copy_from_slice(&self.size.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `Ok(None)` if fewer than `HEADER_SIZE` bytes are available,
    /// and an error if the signature or type is not recognised.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let signature = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if signature >> 8 != HEADER_MAGIC {
            return Err(GlusterError::Decode(format!(
                "Bad block signature 0x{signature:08x}"
            )));
        }
        if (signature & 0xff) as u8 != PROTOCOL_VERSION {
            return Err(GlusterError::Decode(format!(
                "Unsupported protocol version 0x{:02x}",
                signature & 0xff
            )));
        }

        let raw_type = u16::from_be_bytes([buf[4], buf[5]]);
        let op_type = OpType::from_u16(raw_type)
            .ok_or_else(|| GlusterError::Decode(format!("Unknown block type {raw_type}")))?;

        let mut callid = [0u8; 8];
        callid.copy_from_slice(&buf[8..16]);

        Ok(Some(Self {
            op_type,
            op: u16::from_be_bytes([buf[6], buf[7]]),
            callid: u64::from_be_bytes(callid),
            size: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
        }))
    }

    /// Validate the declared payload size against a limit.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.size > max_payload_size {
            return Err(GlusterError::Decode(format!(
                "Payload size {} exceeds maximum {}",
                self.size, max_payload_size
            )));
        }
        Ok(())
    }

    /// Total encoded length of the block this header describes.
    #[inline]
    pub fn block_len(&self) -> usize {
        HEADER_SIZE + self.size as usize + TRAILER_SIZE
    }

    /// Check if this is a request.
    #[inline]
    pub fn is_request(&self) -> bool {
        self.op_type.is_request()
    }
}
