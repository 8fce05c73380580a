//! Transport: moving blocks between a byte stream and a [`Connection`].
//!
//! Fops complete inside synchronous continuations, so replies leave through
//! a non-blocking [`ReplySink`]. The stream side is plain tokio I/O: a read
//! loop feeding a [`BlockBuffer`] and a dedicated writer task draining the
//! sink.
//!
//! [`Connection`]: crate::server::Connection
//! [`BlockBuffer`]: crate::protocol::BlockBuffer

mod serve;
mod writer;

pub use serve::serve_connection;
pub use writer::{
    spawn_writer_task, spawn_writer_task_default, OutboundBlock, WriterConfig, WriterHandle,
    DEFAULT_HIGH_WATER, MAX_BATCH_SIZE,
};

use crate::error::Result;
use crate::protocol::Block;

/// Destination for reply blocks.
///
/// Called from continuations, which may run on any thread and must not
/// block.
pub trait ReplySink: Send + Sync + 'static {
    /// Queue `block` for delivery to the peer.
    fn send_reply(&self, block: Block) -> Result<()>;
}
