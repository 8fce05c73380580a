//! Per-connection table mapping wire fd numbers to open files.
//!
//! Numbers are handed out lowest-free-first, like a process fd table.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{GlusterError, Result};
use crate::xlator::Fd;

/// Default maximum open fds per connection.
pub const DEFAULT_MAX_FDS: usize = 64 * 1024;

struct Slots {
    open: HashMap<i64, Arc<Fd>>,
    /// Released numbers below `next`.
    free: BTreeSet<i64>,
    /// Lowest number never handed out.
    next: i64,
}

/// Wire fd table.
pub struct FdTable {
    slots: Mutex<Slots>,
    max_fds: usize,
}

impl FdTable {
    /// Create an empty table with the default limit.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_FDS)
    }

    /// Create an empty table holding at most `max_fds` entries.
    pub fn with_limit(max_fds: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                open: HashMap::new(),
                free: BTreeSet::new(),
                next: 0,
            }),
            max_fds,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `fd`, returning its wire number.
    ///
    /// Fails with `Exhausted` once the table is full.
    pub fn insert(&self, fd: Arc<Fd>) -> Result<i64> {
        let mut slots = self.lock();
        if slots.open.len() >= self.max_fds {
            return Err(GlusterError::Exhausted);
        }
        let no = match slots.free.pop_first() {
            Some(no) => no,
            None => {
                let no = slots.next;
                slots.next += 1;
                no
            }
        };
        slots.open.insert(no, fd);
        Ok(no)
    }

    /// Resolve a wire number.
    pub fn get(&self, no: i64) -> Result<Arc<Fd>> {
        self.lock()
            .open
            .get(&no)
            .cloned()
            .ok_or(GlusterError::BadFd(no))
    }

    /// Release a wire number.
    pub fn remove(&self, no: i64) -> Option<Arc<Fd>> {
        let mut slots = self.lock();
        let fd = slots.open.remove(&no)?;
        slots.free.insert(no);
        Some(fd)
    }

    /// Release every entry, returning the files that were open.
    pub fn drain(&self) -> Vec<Arc<Fd>> {
        let mut slots = self.lock();
        slots.free.clear();
        slots.next = 0;
        slots.open.drain().map(|(_, fd)| fd).collect()
    }

    /// Number of open entries.
    pub fn len(&self) -> usize {
        self.lock().open.len()
    }

    /// Check if no fd is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
