//! # glusterfs-core
//!
//! Call stacks, translator plumbing and the block protocol of a
//! GlusterFS-style distributed filesystem server.
//!
//! ## Architecture
//!
//! - **Stacks** ([`stack`]): every request runs on a call stack. A
//!   translator passes work to a child with WIND and hands the result back
//!   with UNWIND; the parent's continuation runs synchronously when the
//!   child unwinds.
//! - **Translators** ([`xlator`]): the [`Xlator`] trait with one entry point
//!   per filesystem operation.
//! - **Protocol** ([`protocol`]): the framed block codec and the
//!   dictionary payload it carries.
//! - **Server** ([`server`]): the op dispatch table turning request blocks
//!   into wound fops and unwound fops into reply blocks.
//!
//! ## Example
//!
//! ```ignore
//! use glusterfs_core::Server;
//!
//! #[tokio::main]
//! async fn main() -> glusterfs_core::error::Result<()> {
//!     let server = Server::builder()
//!         .subvolume(posix)
//!         .build()?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:6996").await?;
//!     server.listen(listener).await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod server;
pub mod stack;
pub mod transport;
pub mod xlator;

pub use error::GlusterError;
pub use protocol::{Block, Dict, Fop, MgmtOp, OpType, Value};
pub use server::{Connection, Server, ServerBuilder, ServerConfig};
pub use stack::{CallFrame, CallPool, CallStack, Cookie, PoolConfig};
pub use xlator::{FopArgs, FopOutput, FopReply, Xlator};
