//! Pending-frame dump for diagnostics.
//!
//! [`dump_pending`] only ever try-locks, so it is safe to call while other
//! threads are stuck holding a pool or stack lock. Stacks whose lock is
//! busy are reported with `locked: true` and no frames.

use serde::Serialize;

use super::frame::FrameId;
use super::pool::CallPool;
use crate::error::Result;

/// Snapshot of a pool's live stacks.
#[derive(Debug, Clone, Serialize)]
pub struct PendingDump {
    pub call_count: usize,
    pub total_count: u64,
    pub stacks: Vec<PendingStack>,
}

/// One live stack.
#[derive(Debug, Clone, Serialize)]
pub struct PendingStack {
    pub unique: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
    pub lk_owner: u64,
    pub op: Option<&'static str>,
    /// The stack lock was busy; frames were skipped.
    pub locked: bool,
    pub frames: Vec<PendingFrame>,
}

/// One frame of a live stack.
#[derive(Debug, Clone, Serialize)]
pub struct PendingFrame {
    pub id: FrameId,
    pub parent: Option<FrameId>,
    pub translator: String,
    pub op: Option<&'static str>,
    pub wind_from: Option<String>,
    pub wind_to: String,
    pub ref_count: usize,
    pub complete: bool,
    pub latency_us: Option<u64>,
}

impl PendingDump {
    /// Render as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Emit the dump through `tracing` at info level.
    pub fn log(&self) {
        tracing::info!(
            "call pool: {} live, {} total",
            self.call_count,
            self.total_count
        );
        for stack in &self.stacks {
            tracing::info!(
                "stack {} uid={} gid={} pid={} op={}{}",
                stack.unique,
                stack.uid,
                stack.gid,
                stack.pid,
                stack.op.unwrap_or("-"),
                if stack.locked { " [locked]" } else { "" }
            );
            for frame in &stack.frames {
                tracing::info!(
                    "  frame {} {} op={} ref_count={} complete={}",
                    frame.id,
                    frame.translator,
                    frame.op.unwrap_or("-"),
                    frame.ref_count,
                    frame.complete
                );
            }
        }
    }
}

/// Snapshot every live stack of `pool`.
///
/// Returns `None` if the pool lock is held by someone else.
pub fn dump_pending(pool: &CallPool) -> Option<PendingDump> {
    let stacks = {
        let guard = pool.try_lock_stacks()?;
        guard.values().cloned().collect::<Vec<_>>()
    };

    let stacks = stacks
        .iter()
        .map(|stack| {
            let creds = stack.creds();
            let mut out = PendingStack {
                unique: stack.unique(),
                uid: creds.uid,
                gid: creds.gid,
                pid: creds.pid,
                lk_owner: stack.lk_owner(),
                op: stack.op().map(|op| op.name()),
                locked: false,
                frames: Vec::new(),
            };

            match stack.try_lock_state() {
                Some(state) => {
                    out.frames = state
                        .frames
                        .iter()
                        .map(|(id, f)| PendingFrame {
                            id: *id,
                            parent: f.parent,
                            translator: f.this.name().to_owned(),
                            op: f.op.map(|op| op.name()),
                            wind_from: f.wind_from.clone(),
                            wind_to: f.wind_to.clone(),
                            ref_count: f.ref_count,
                            complete: f.complete,
                            latency_us: f.latency().map(|d| d.as_micros() as u64),
                        })
                        .collect();
                }
                None => out.locked = true,
            }
            out
        })
        .collect::<Vec<_>>();

    Some(PendingDump {
        call_count: stacks.len(),
        total_count: pool.total_count(),
        stacks,
    })
}
