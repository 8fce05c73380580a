//! Protocol module - wire format, blocks and dictionary payloads.
//!
//! This module implements the network hop encoding:
//! - 20-byte block header with signature and trailer
//! - Block buffer for accumulating partial reads
//! - Typed key/value dictionary carried as the block payload
//! - Op-code tables

mod block;
mod block_buffer;
mod dict;
mod ops;
mod wire_format;

pub use block::Block;
pub use block_buffer::BlockBuffer;
pub use dict::{Dict, Value, DICT_KEY_VALUE_MAX_SIZE};
pub use ops::{Fop, MgmtOp};
pub use wire_format::{
    Header, OpType, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, PROTOCOL_VERSION, SIGNATURE, TRAILER,
    TRAILER_SIZE,
};
