//! Resource budget for call frames and call stacks.
//!
//! A [`Budget`] bounds how many frames (or stacks) may be live in a call
//! pool at once. Reservations never wait: a request that cannot reserve
//! fails immediately with [`GlusterError::Exhausted`], and the caller turns
//! that into an `ENOMEM` reply for that request alone.
//!
//! Each reservation is held by a [`Reservation`] guard that gives the slot
//! back when dropped, so freeing a frame or stack releases its budget.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{GlusterError, Result};

/// Default maximum number of live frames per pool.
pub const DEFAULT_MAX_FRAMES: usize = 64 * 1024;

/// Default maximum number of live stacks per pool.
pub const DEFAULT_MAX_STACKS: usize = 16 * 1024;

/// Lock-free counter of reserved slots with a fixed limit.
///
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct Budget {
    /// Slots currently reserved.
    in_use: Arc<AtomicUsize>,
    /// Maximum slots.
    limit: usize,
}

impl Budget {
    /// Create a budget with the given limit.
    pub fn new(limit: usize) -> Self {
        Self {
            in_use: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Slots currently reserved.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Maximum slots.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots still available.
    #[inline]
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.in_use())
    }

    /// Check if the budget is used up.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.in_use() >= self.limit
    }

    /// Reserve one slot without blocking.
    ///
    /// Returns `Err(Exhausted)` if the limit has been reached.
    pub fn try_reserve(&self) -> Result<Reservation> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.limit).then_some(current + 1)
            })
            .map_err(|_| GlusterError::Exhausted)?;

        Ok(Reservation {
            budget: self.clone(),
            released: false,
        })
    }

    #[inline]
    fn release(&self) {
        self.in_use.fetch_sub(1, Ordering::Release);
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAMES)
    }
}

/// Guard that releases a budget slot on drop.
#[derive(Debug)]
pub struct Reservation {
    budget: Budget,
    released: bool,
}

impl Reservation {
    /// Manually release the slot.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.budget.release();
            self.released = true;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release_once();
    }
}
