//! Call pool, call stacks and the WIND/UNWIND continuation protocol.
//!
//! # Example
//!
//! ```ignore
//! use glusterfs_core::stack::{create_stack, destroy_stack, CallPool};
//!
//! let pool = CallPool::new();
//! let root = create_stack(graph.clone(), &pool)?;
//!
//! root.wind(&graph, FopArgs::Stat { path: "/".into() }, |root, _cookie, reply| {
//!     println!("stat returned {}", reply.op_ret);
//!     destroy_stack(root.stack()).ok();
//! });
//! ```

mod budget;
mod dump;
mod frame;
mod pool;
mod timeout;

use std::sync::Arc;

pub use budget::{Budget, Reservation, DEFAULT_MAX_FRAMES, DEFAULT_MAX_STACKS};
pub use dump::{dump_pending, PendingDump, PendingFrame, PendingStack};
pub use frame::{
    CallFrame, CallStack, Continuation, Cookie, Credentials, FrameId, StackError,
};
pub use pool::{CallPool, PoolConfig, StackInit};
pub use timeout::arm_timeout;

use crate::error::Result;
use crate::xlator::Xlator;

/// Create a stack in `pool` whose root frame runs in `xlator`.
pub fn create_stack(xlator: Arc<dyn Xlator>, pool: &Arc<CallPool>) -> Result<CallFrame> {
    pool.create_stack(xlator)
}

/// Start a new stack carrying `frame`'s stack identity.
pub fn copy_stack(frame: &CallFrame) -> Result<CallFrame> {
    frame.copy_stack()
}

/// Unlink `stack` from its pool and free its frames.
pub fn destroy_stack(stack: &Arc<CallStack>) -> Result<()> {
    stack.destroy()
}

/// Number of frames in `stack`'s arena.
pub fn frames_count(stack: &CallStack) -> usize {
    stack.frames_count()
}
