//! Call timeouts layered on top of UNWIND.
//!
//! There is no cancellation in the continuation protocol itself. A timeout
//! unwinds the frame on the caller's behalf with `ETIMEDOUT`; when the
//! child eventually answers, its own UNWIND is rejected as a duplicate.

use std::time::Duration;

use tokio::task::JoinHandle;

use super::CallFrame;
use crate::xlator::FopReply;

/// Unwind `frame` with `ETIMEDOUT` if it is still pending after `after`.
///
/// The task resolves to `true` if it fired. Aborting the handle disarms it.
pub fn arm_timeout(frame: CallFrame, after: Duration) -> JoinHandle<bool> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;

        match frame.unwind(FopReply::error(libc::ETIMEDOUT)) {
            Ok(()) => {
                tracing::warn!(
                    "frame {} of stack {} in {} timed out after {:?}",
                    frame.id(),
                    frame.stack().unique(),
                    frame.this().name(),
                    after
                );
                true
            }
            Err(_) => false,
        }
    })
}
