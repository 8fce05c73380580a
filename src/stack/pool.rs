//! Process-wide registry of live call stacks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::budget::{Budget, DEFAULT_MAX_FRAMES, DEFAULT_MAX_STACKS};
use super::frame::{CallFrame, CallStack, Credentials, FrameId, FrameRecord};
use crate::error::Result;
use crate::protocol::Fop;
use crate::xlator::Xlator;

/// Configuration for a [`CallPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum live frames across all stacks.
    pub max_frames: usize,
    /// Maximum live stacks.
    pub max_stacks: usize,
    /// Record WIND/UNWIND timestamps on every frame.
    pub measure_latency: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            max_stacks: DEFAULT_MAX_STACKS,
            measure_latency: false,
        }
    }
}

/// Identity given to a new stack.
#[derive(Debug, Clone, Default)]
pub struct StackInit {
    /// Request id; the pool assigns one when `None`.
    pub unique: Option<u64>,
    pub creds: Credentials,
    pub lk_owner: u64,
    pub op: Option<Fop>,
}

/// Registry of every live [`CallStack`] in the process.
///
/// Stacks are kept in creation order. Only stacks are linked here; frames
/// live in their stack's arena.
pub struct CallPool {
    stacks: Mutex<BTreeMap<u64, Arc<CallStack>>>,
    next_seq: AtomicU64,
    total_count: AtomicU64,
    frame_budget: Budget,
    stack_budget: Budget,
    measure_latency: bool,
}

impl CallPool {
    /// Create a pool with default limits.
    pub fn new() -> Arc<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool with custom limits.
    pub fn with_config(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            stacks: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(1),
            total_count: AtomicU64::new(0),
            frame_budget: Budget::new(config.max_frames),
            stack_budget: Budget::new(config.max_stacks),
            measure_latency: config.measure_latency,
        })
    }

    pub(crate) fn lock_stacks(&self) -> MutexGuard<'_, BTreeMap<u64, Arc<CallStack>>> {
        self.stacks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn try_lock_stacks(&self) -> Option<MutexGuard<'_, BTreeMap<u64, Arc<CallStack>>>> {
        match self.stacks.try_lock() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    #[inline]
    pub(crate) fn frame_budget(&self) -> &Budget {
        &self.frame_budget
    }

    /// Create a stack whose root frame runs in `xlator`.
    pub fn create_stack(self: &Arc<Self>, xlator: Arc<dyn Xlator>) -> Result<CallFrame> {
        self.create_stack_with(xlator, StackInit::default())
    }

    /// Create a stack with explicit identity.
    ///
    /// Fails with `Exhausted` when the stack or frame budget is used up;
    /// nothing is registered in that case.
    pub fn create_stack_with(
        self: &Arc<Self>,
        xlator: Arc<dyn Xlator>,
        init: StackInit,
    ) -> Result<CallFrame> {
        let stack_slot = self.stack_budget.try_reserve()?;
        let frame_slot = self.frame_budget.try_reserve()?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let root = FrameRecord::root(xlator.clone(), frame_slot, self.measure_latency);
        let stack = Arc::new(CallStack::new(
            self.clone(),
            seq,
            init,
            root,
            stack_slot,
            self.measure_latency,
        ));

        self.lock_stacks().insert(seq, stack.clone());
        self.total_count.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("stack {} created in {}", stack.unique(), xlator.name());

        Ok(CallFrame::new(stack, FrameId::ROOT, xlator))
    }

    pub(crate) fn unregister(&self, seq: u64) {
        self.lock_stacks().remove(&seq);
    }

    /// Live stacks.
    pub fn count(&self) -> usize {
        self.lock_stacks().len()
    }

    /// Stacks ever created.
    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    /// Live frames across all stacks.
    pub fn frames_in_use(&self) -> usize {
        self.frame_budget.in_use()
    }

    /// Snapshot of live stacks in creation order.
    pub fn stacks(&self) -> Vec<Arc<CallStack>> {
        self.lock_stacks().values().cloned().collect()
    }
}

impl std::fmt::Debug for CallPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPool")
            .field("total_count", &self.total_count())
            .field("frames_in_use", &self.frames_in_use())
            .finish_non_exhaustive()
    }
}
