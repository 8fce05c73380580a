//! Error types for glusterfs-core.
//!
//! Every failure that can reach a client is eventually flattened into a
//! POSIX `(op_ret, op_errno)` pair; [`GlusterError::errno`] performs that
//! mapping.

use thiserror::Error;

use crate::stack::FrameId;

/// Main error type for all call-stack and protocol operations.
#[derive(Debug, Error)]
pub enum GlusterError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (pending-frame dumps only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed block or dictionary on the wire.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A required dictionary key is absent.
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// A dictionary key holds a value of the wrong type.
    #[error("Key {key} holds {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// No handler is registered for the op-code.
    #[error("Unknown op {op} for type {op_type}")]
    UnknownOp { op_type: u16, op: u16 },

    /// The wire fd number does not name an open file.
    #[error("Bad file descriptor: {0}")]
    BadFd(i64),

    /// The frame or stack budget of the call pool is used up.
    #[error("Call pool exhausted")]
    Exhausted,

    /// UNWIND on a frame that has already completed.
    #[error("Frame {0} already completed")]
    AlreadyComplete(FrameId),

    /// UNWIND on the root frame of a stack.
    #[error("Root frame cannot be unwound")]
    RootFrame,

    /// The frame does not belong to a live stack.
    #[error("Frame {0} not found")]
    UnknownFrame(FrameId),

    /// Stack destruction attempted with frames still outstanding.
    #[error("Stack busy: {pending} frame(s) pending")]
    StackBusy { pending: usize },

    /// The stack has already been destroyed.
    #[error("Stack already destroyed")]
    StackDestroyed,

    /// No subvolume is bound to the connection yet.
    #[error("Not connected to a subvolume")]
    NotConnected,

    /// Invalid server or pool configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl GlusterError {
    /// POSIX errno reported to the peer for this error.
    pub fn errno(&self) -> i32 {
        match self {
            GlusterError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            GlusterError::Json(_)
            | GlusterError::MsgPackEncode(_)
            | GlusterError::MsgPackDecode(_)
            | GlusterError::Decode(_)
            | GlusterError::MissingKey(_)
            | GlusterError::TypeMismatch { .. } => libc::EINVAL,
            GlusterError::UnknownOp { .. } => libc::ENOSYS,
            GlusterError::BadFd(_) => libc::EBADF,
            GlusterError::Exhausted => libc::ENOMEM,
            GlusterError::AlreadyComplete(_)
            | GlusterError::RootFrame
            | GlusterError::UnknownFrame(_)
            | GlusterError::StackDestroyed
            | GlusterError::Config(_) => libc::EINVAL,
            GlusterError::StackBusy { .. } => libc::EBUSY,
            GlusterError::NotConnected | GlusterError::ConnectionClosed => libc::ENOTCONN,
        }
    }
}

/// Result type alias using GlusterError.
pub type Result<T> = std::result::Result<T, GlusterError>;
