//! Translator interface.
//!
//! A translator implements any subset of the filesystem operations and
//! forwards the rest to its children. Every operation is a single entry
//! point, [`Xlator::fop`], which receives the frame created for it and must
//! eventually complete that frame exactly once with
//! [`CallFrame::unwind`], either directly or from the continuation of a
//! child it wound to.
//!
//! # Example
//!
//! ```ignore
//! use glusterfs_core::xlator::{FopArgs, FopReply, Xlator, pass_through};
//! use glusterfs_core::stack::CallFrame;
//!
//! struct ReadOnly { children: Vec<Arc<dyn Xlator>> }
//!
//! impl Xlator for ReadOnly {
//!     fn name(&self) -> &str { "read-only" }
//!     fn children(&self) -> &[Arc<dyn Xlator>] { &self.children }
//!
//!     fn fop(&self, frame: CallFrame, args: FopArgs) {
//!         match args {
//!             FopArgs::Write { .. } | FopArgs::Unlink { .. } => {
//!                 let _ = frame.unwind(FopReply::error(libc::EROFS));
//!             }
//!             other => frame.wind(&self.children[0], other, pass_through),
//!         }
//!     }
//! }
//! ```

mod fd;
mod fop;

use std::sync::Arc;

pub use fd::{Fd, FdKind};
pub use fop::{DirEntry, Flock, FopArgs, FopOutput, FopReply, Stat, Statfs, Timespec};

use crate::stack::{CallFrame, Cookie};

/// A node in the translator graph.
pub trait Xlator: Send + Sync + 'static {
    /// Name used in logs, dumps and stack error reports.
    fn name(&self) -> &str;

    /// Child translators, in graph order.
    fn children(&self) -> &[Arc<dyn Xlator>] {
        &[]
    }

    /// Handle one operation.
    ///
    /// The default forwards to the first child and passes its result back
    /// unchanged; a translator without children fails with `ENOSYS`.
    fn fop(&self, frame: CallFrame, args: FopArgs) {
        match self.children().first() {
            Some(child) => frame.wind(child, args, pass_through),
            None => {
                if let Err(e) = frame.unwind(FopReply::error(libc::ENOSYS)) {
                    tracing::warn!("{}: unwind failed: {}", self.name(), e);
                }
            }
        }
    }
}

/// Continuation that unwinds the parent with the child's reply unchanged.
pub fn pass_through(frame: CallFrame, _cookie: Cookie, reply: FopReply) {
    if let Err(e) = frame.unwind(reply) {
        tracing::warn!("{}: pass-through unwind failed: {}", frame.this().name(), e);
    }
}
