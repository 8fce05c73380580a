//! Call stacks, call frames and the WIND/UNWIND continuation protocol.
//!
//! A [`CallStack`] is the per-request unit of work. It owns an arena of
//! frame records, one per translator activation, keyed by [`FrameId`].
//! A [`CallFrame`] is a cheap handle into that arena.
//!
//! [`CallFrame::wind`] creates a child frame, binds the caller's
//! continuation to it and invokes the child translator.
//! [`CallFrame::unwind`] completes a frame exactly once and invokes the
//! bound continuation with the parent frame. Neither holds the stack lock
//! while calling into a translator or a continuation, so a child may
//! unwind synchronously or later from any thread.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use super::budget::Reservation;
use super::pool::{CallPool, StackInit};
use crate::error::{GlusterError, Result};
use crate::protocol::Fop;
use crate::xlator::{FopArgs, FopReply, Xlator};

/// Identifier of a frame within its stack. The root frame is always `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FrameId(pub(crate) u64);

impl FrameId {
    /// The root frame of every stack.
    pub const ROOT: FrameId = FrameId(0);

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value handed to a continuation identifying which child completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cookie {
    /// The child frame itself (plain `wind`).
    Frame(FrameId),
    /// Caller-supplied value (`wind_cookie`).
    User(u64),
    /// No child frame was created (budget exhausted).
    Unallocated,
}

/// Continuation bound by WIND and invoked once by UNWIND.
pub type Continuation = Box<dyn FnOnce(CallFrame, Cookie, FopReply) + Send>;

/// Caller identity attached to a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
    pub groups: Vec<u32>,
}

/// Last failure recorded on a stack by an error UNWIND.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackError {
    /// errno reported.
    pub op_errno: i32,
    /// Translator whose frame unwound with the error.
    pub xlator: String,
}

pub(crate) struct FrameRecord {
    pub(crate) parent: Option<FrameId>,
    pub(crate) this: Arc<dyn Xlator>,
    ret: Option<Continuation>,
    cookie: Cookie,
    pub(crate) ref_count: usize,
    pub(crate) complete: bool,
    pub(crate) op: Option<Fop>,
    pub(crate) wind_from: Option<String>,
    pub(crate) wind_to: String,
    pub(crate) begin: Option<Instant>,
    pub(crate) end: Option<Instant>,
    local: Option<Box<dyn Any + Send>>,
    _slot: Reservation,
}

impl FrameRecord {
    pub(crate) fn root(this: Arc<dyn Xlator>, slot: Reservation, timed: bool) -> Self {
        Self {
            parent: None,
            wind_to: this.name().to_owned(),
            this,
            ret: None,
            cookie: Cookie::Frame(FrameId::ROOT),
            ref_count: 0,
            complete: false,
            op: None,
            wind_from: None,
            begin: timed.then(Instant::now),
            end: None,
            local: None,
            _slot: slot,
        }
    }

    /// Time between WIND and UNWIND, once both are known.
    pub(crate) fn latency(&self) -> Option<Duration> {
        Some(self.end?.duration_since(self.begin?))
    }
}

pub(crate) struct StackState {
    pub(crate) frames: BTreeMap<FrameId, FrameRecord>,
    next_frame: u64,
    pub(crate) error: Option<StackError>,
    pub(crate) destroyed: bool,
    destroy_requested: bool,
    slot: Option<Reservation>,
}

impl StackState {
    /// Wound frames that have not unwound yet.
    pub(crate) fn pending(&self) -> usize {
        self.frames
            .values()
            .filter(|f| f.parent.is_some() && !f.complete)
            .count()
    }

    /// Mark the stack destroyed and hand back what it owns.
    fn teardown(&mut self) -> (BTreeMap<FrameId, FrameRecord>, Option<Reservation>) {
        self.destroyed = true;
        self.destroy_requested = false;
        (std::mem::take(&mut self.frames), self.slot.take())
    }
}

/// One request's chain of translator activations.
pub struct CallStack {
    pool: Arc<CallPool>,
    seq: u64,
    unique: u64,
    creds: Credentials,
    lk_owner: u64,
    op: Option<Fop>,
    created: SystemTime,
    timed: bool,
    state: Mutex<StackState>,
}

impl CallStack {
    pub(crate) fn new(
        pool: Arc<CallPool>,
        seq: u64,
        init: StackInit,
        root: FrameRecord,
        slot: Reservation,
        timed: bool,
    ) -> Self {
        let mut frames = BTreeMap::new();
        frames.insert(FrameId::ROOT, root);
        Self {
            pool,
            seq,
            unique: init.unique.unwrap_or(seq),
            creds: init.creds,
            lk_owner: init.lk_owner,
            op: init.op,
            created: SystemTime::now(),
            timed,
            state: Mutex::new(StackState {
                frames,
                next_frame: 1,
                error: None,
                destroyed: false,
                destroy_requested: false,
                slot: Some(slot),
            }),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn try_lock_state(&self) -> Option<MutexGuard<'_, StackState>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    #[inline]
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Pool this stack is registered with.
    #[inline]
    pub fn pool(&self) -> &Arc<CallPool> {
        &self.pool
    }

    /// Request identifier (the wire call id for server-side stacks).
    #[inline]
    pub fn unique(&self) -> u64 {
        self.unique
    }

    #[inline]
    pub fn creds(&self) -> &Credentials {
        &self.creds
    }

    #[inline]
    pub fn lk_owner(&self) -> u64 {
        self.lk_owner
    }

    /// Operation the stack was created for.
    #[inline]
    pub fn op(&self) -> Option<Fop> {
        self.op
    }

    #[inline]
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Number of frames currently in the arena, root included.
    pub fn frames_count(&self) -> usize {
        self.lock_state().frames.len()
    }

    /// Number of wound frames that have not unwound.
    pub fn pending_frames(&self) -> usize {
        self.lock_state().pending()
    }

    /// Last error recorded by an UNWIND, cleared by a later success.
    pub fn error(&self) -> Option<StackError> {
        self.lock_state().error.clone()
    }

    /// Check if [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.lock_state().destroyed
    }

    /// Unlink the stack from its pool and free every frame.
    ///
    /// Refused with `StackBusy` while any wound frame has not unwound.
    pub fn destroy(self: &Arc<Self>) -> Result<()> {
        let owned = {
            let mut state = self.lock_state();
            if state.destroyed {
                return Err(GlusterError::StackDestroyed);
            }
            let pending = state.pending();
            if pending > 0 {
                return Err(GlusterError::StackBusy { pending });
            }
            state.teardown()
        };
        self.release(owned);
        Ok(())
    }

    /// Destroy the stack now, or as soon as its last pending frame unwinds.
    ///
    /// Returns `true` if the stack was destroyed by this call.
    pub fn destroy_when_idle(self: &Arc<Self>) -> Result<bool> {
        let owned = {
            let mut state = self.lock_state();
            if state.destroyed {
                return Err(GlusterError::StackDestroyed);
            }
            let pending = state.pending();
            if pending > 0 {
                state.destroy_requested = true;
                tracing::debug!(
                    "stack {}: destroy deferred, {} frame(s) pending",
                    self.unique,
                    pending
                );
                return Ok(false);
            }
            state.teardown()
        };
        self.release(owned);
        Ok(true)
    }

    /// Finish a deferred destroy once nothing is pending.
    fn reap(self: &Arc<Self>) {
        let owned = {
            let mut state = self.lock_state();
            if !state.destroy_requested || state.destroyed || state.pending() > 0 {
                return;
            }
            state.teardown()
        };
        self.release(owned);
    }

    fn release(&self, (frames, slot): (BTreeMap<FrameId, FrameRecord>, Option<Reservation>)) {
        self.pool.unregister(self.seq);
        tracing::trace!("stack {} destroyed ({} frames)", self.unique, frames.len());

        // Records may own continuations that touch other stacks; drop them
        // with no lock held.
        drop(frames);
        drop(slot);
    }
}

impl fmt::Debug for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallStack")
            .field("unique", &self.unique)
            .field("creds", &self.creds)
            .field("lk_owner", &self.lk_owner)
            .field("op", &self.op)
            .finish_non_exhaustive()
    }
}

/// Handle to one frame of a stack.
#[derive(Clone)]
pub struct CallFrame {
    stack: Arc<CallStack>,
    id: FrameId,
    this: Arc<dyn Xlator>,
}

impl CallFrame {
    pub(crate) fn new(stack: Arc<CallStack>, id: FrameId, this: Arc<dyn Xlator>) -> Self {
        Self { stack, id, this }
    }

    #[inline]
    pub fn id(&self) -> FrameId {
        self.id
    }

    #[inline]
    pub fn stack(&self) -> &Arc<CallStack> {
        &self.stack
    }

    /// Translator executing in this frame.
    #[inline]
    pub fn this(&self) -> &Arc<dyn Xlator> {
        &self.this
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.id == FrameId::ROOT
    }

    /// Handle to the parent frame, `None` for the root.
    pub fn parent(&self) -> Option<CallFrame> {
        let state = self.stack.lock_state();
        let parent = state.frames.get(&self.id)?.parent?;
        let this = state.frames.get(&parent)?.this.clone();
        Some(CallFrame::new(self.stack.clone(), parent, this))
    }

    /// Children wound from this frame that have not unwound.
    pub fn ref_count(&self) -> usize {
        self.stack
            .lock_state()
            .frames
            .get(&self.id)
            .map_or(0, |f| f.ref_count)
    }

    /// Check if this frame has been unwound.
    pub fn is_complete(&self) -> bool {
        self.stack
            .lock_state()
            .frames
            .get(&self.id)
            .is_some_and(|f| f.complete)
    }

    /// WIND-to-UNWIND time, when latency measurement is enabled.
    pub fn latency(&self) -> Option<Duration> {
        self.stack.lock_state().frames.get(&self.id)?.latency()
    }

    /// Attach translator-private state, replacing any previous value.
    pub fn set_local<T: Any + Send>(&self, value: T) {
        if let Some(f) = self.stack.lock_state().frames.get_mut(&self.id) {
            f.local = Some(Box::new(value));
        }
    }

    /// Detach translator-private state if it has type `T`.
    pub fn take_local<T: Any + Send>(&self) -> Option<T> {
        let mut state = self.stack.lock_state();
        let frame = state.frames.get_mut(&self.id)?;
        match frame.local.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                frame.local = Some(other);
                None
            }
        }
    }

    /// Start a new independent stack with this stack's identity.
    ///
    /// Credentials, lock owner, op and unique id are copied; the new root
    /// frame runs in this frame's translator.
    pub fn copy_stack(&self) -> Result<CallFrame> {
        let init = StackInit {
            unique: Some(self.stack.unique),
            creds: self.stack.creds.clone(),
            lk_owner: self.stack.lk_owner,
            op: self.stack.op,
        };
        self.stack
            .pool
            .create_stack_with(self.this.clone(), init)
    }

    /// WIND: call `child` with `args`, binding `ret` as the continuation.
    ///
    /// The continuation receives this frame, the child frame's id as cookie,
    /// and the child's reply. If the frame budget is exhausted no frame is
    /// created and `ret` runs immediately with `ENOMEM`.
    pub fn wind<F>(&self, child: &Arc<dyn Xlator>, args: FopArgs, ret: F)
    where
        F: FnOnce(CallFrame, Cookie, FopReply) + Send + 'static,
    {
        self.wind_inner(child, args, None, Box::new(ret));
    }

    /// WIND with a caller-supplied cookie instead of the child frame id.
    pub fn wind_cookie<F>(&self, cookie: u64, child: &Arc<dyn Xlator>, args: FopArgs, ret: F)
    where
        F: FnOnce(CallFrame, Cookie, FopReply) + Send + 'static,
    {
        self.wind_inner(child, args, Some(cookie), Box::new(ret));
    }

    fn wind_inner(
        &self,
        child: &Arc<dyn Xlator>,
        args: FopArgs,
        cookie: Option<u64>,
        ret: Continuation,
    ) {
        let fop = args.fop();
        let fallback = cookie.map_or(Cookie::Unallocated, Cookie::User);

        let slot = match self.stack.pool.frame_budget().try_reserve() {
            Ok(slot) => slot,
            Err(e) => {
                tracing::debug!(
                    "{}: cannot wind {} to {}: {}",
                    self.this.name(),
                    fop,
                    child.name(),
                    e
                );
                ret(self.clone(), fallback, FopReply::error(e.errno()));
                return;
            }
        };

        let id = {
            let mut state = self.stack.lock_state();
            let state = &mut *state;
            match state.frames.get_mut(&self.id) {
                Some(parent) if !state.destroyed => {
                    parent.ref_count += 1;
                    let id = FrameId(state.next_frame);
                    state.next_frame += 1;
                    state.frames.insert(
                        id,
                        FrameRecord {
                            parent: Some(self.id),
                            this: child.clone(),
                            ret: Some(ret),
                            cookie: cookie.map_or(Cookie::Frame(id), Cookie::User),
                            ref_count: 0,
                            complete: false,
                            op: Some(fop),
                            wind_from: Some(self.this.name().to_owned()),
                            wind_to: child.name().to_owned(),
                            begin: self.stack.timed.then(Instant::now),
                            end: None,
                            local: None,
                            _slot: slot,
                        },
                    );
                    Ok(id)
                }
                _ => Err(ret),
            }
        };

        let id = match id {
            Ok(id) => id,
            Err(ret) => {
                tracing::warn!(
                    "{}: wind {} on frame {} of a destroyed stack",
                    self.this.name(),
                    fop,
                    self.id
                );
                ret(self.clone(), fallback, FopReply::error(libc::EINVAL));
                return;
            }
        };

        let frame = CallFrame::new(self.stack.clone(), id, child.clone());
        let span = tracing::trace_span!("xlator", name = child.name());
        let _enter = span.enter();
        tracing::trace!("wind {} {} -> {}", fop, self.this.name(), child.name());
        child.fop(frame, args);
    }

    /// Hand this frame over to `child` without allocating a new frame.
    ///
    /// Whatever `child` unwinds goes straight to this frame's continuation.
    pub fn wind_tail(&self, child: &Arc<dyn Xlator>, args: FopArgs) {
        if let Some(f) = self.stack.lock_state().frames.get_mut(&self.id) {
            f.this = child.clone();
            f.wind_to = child.name().to_owned();
        }

        let frame = CallFrame::new(self.stack.clone(), self.id, child.clone());
        let span = tracing::trace_span!("xlator", name = child.name());
        let _enter = span.enter();
        tracing::trace!("wind_tail {} -> {}", self.this.name(), child.name());
        child.fop(frame, args);
    }

    /// UNWIND: complete this frame and invoke its continuation.
    ///
    /// If a destroy was deferred with [`CallStack::destroy_when_idle`], the
    /// unwind that leaves no frame pending destroys the stack.
    ///
    /// # Errors
    ///
    /// `AlreadyComplete` on a second unwind of the same frame, `RootFrame`
    /// for the root and `UnknownFrame` once the stack has been destroyed.
    pub fn unwind(&self, reply: FopReply) -> Result<()> {
        let (ret, cookie, parent) = {
            let mut state = self.stack.lock_state();
            let state = &mut *state;

            let parent_id = match state.frames.get(&self.id) {
                None => return Err(GlusterError::UnknownFrame(self.id)),
                Some(f) if f.complete => return Err(GlusterError::AlreadyComplete(self.id)),
                Some(f) => f.parent.ok_or(GlusterError::RootFrame)?,
            };
            let parent = match state.frames.get_mut(&parent_id) {
                Some(p) => {
                    p.ref_count = p.ref_count.saturating_sub(1);
                    CallFrame::new(self.stack.clone(), parent_id, p.this.clone())
                }
                None => return Err(GlusterError::UnknownFrame(parent_id)),
            };

            let Some(record) = state.frames.get_mut(&self.id) else {
                return Err(GlusterError::UnknownFrame(self.id));
            };
            record.complete = true;
            if record.begin.is_some() {
                record.end = Some(Instant::now());
            }
            let cookie = record.cookie;
            let ret = record.ret.take();
            let xlator = record.this.name().to_owned();

            if reply.op_ret < 0 {
                state.error = Some(StackError {
                    op_errno: reply.op_errno,
                    xlator,
                });
            } else if reply.op_ret == 0 {
                state.error = None;
            }

            (ret, cookie, parent)
        };

        if reply.is_error() {
            tracing::debug!(
                "unwind {} -> {}: ret={} errno={}",
                self.this.name(),
                parent.this.name(),
                reply.op_ret,
                reply.op_errno
            );
        } else {
            tracing::trace!(
                "unwind {} -> {}: ret={}",
                self.this.name(),
                parent.this.name(),
                reply.op_ret
            );
        }

        let span = tracing::trace_span!("xlator", name = parent.this.name());
        let _enter = span.enter();
        if let Some(ret) = ret {
            ret(parent, cookie, reply);
        }
        // The continuation may have wound more work; check afterwards.
        self.stack.reap();
        Ok(())
    }
}

impl fmt::Debug for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFrame")
            .field("stack", &self.stack.unique)
            .field("id", &self.id)
            .field("this", &self.this.name())
            .finish()
    }
}
