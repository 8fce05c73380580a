//! One client connection: request dispatch and reply marshalling.
//!
//! Every decodable request block gets exactly one reply block with the same
//! op-code and call id:
//! - unknown op-code: `ENOSYS`, nothing is dispatched
//! - missing or mistyped required key: `EINVAL`, nothing is wound
//! - unknown fd number: `EBADF`, nothing is wound
//! - call pool exhausted: `ENOMEM`
//! - otherwise the fop is wound into the bound subvolume and its result is
//!   marshalled when it unwinds back to the root frame.
//!
//! Blocks that cannot be decoded at all carry no usable call context and
//! are dropped with a warning.

use std::sync::{Arc, RwLock};

use bytes::Bytes;

use super::fd_table::FdTable;
use super::mgmt;
use super::table::{keys, marshal_reply, optional_narrow, status_dict, FopHandler, Handler};
use super::Shared;
use crate::codec::MsgPackCodec;
use crate::error::{GlusterError, Result};
use crate::protocol::{Block, Dict, Fop};
use crate::stack::{CallFrame, CallPool, Credentials, StackInit};
use crate::transport::ReplySink;
use crate::xlator::{Fd, FdKind, FopArgs, FopOutput, Xlator};

/// Server side of one client connection.
pub struct Connection {
    shared: Arc<Shared>,
    fds: Arc<FdTable>,
    sink: Arc<dyn ReplySink>,
    bound: RwLock<Option<Arc<dyn Xlator>>>,
}

impl Connection {
    pub(crate) fn new(shared: Arc<Shared>, sink: Arc<dyn ReplySink>) -> Self {
        let bound = if shared.config.require_handshake {
            None
        } else {
            shared.subvolumes.first().cloned()
        };
        Self {
            fds: Arc::new(FdTable::with_limit(shared.config.max_fds)),
            shared,
            sink,
            bound: RwLock::new(bound),
        }
    }

    /// Decode one serialized block and handle it.
    pub fn handle_bytes(&self, bytes: &[u8]) {
        match Block::deserialize(bytes) {
            Ok(block) => self.handle_request(block),
            Err(e) => tracing::warn!("Dropping undecodable block: {}", e),
        }
    }

    /// Handle one request block.
    pub fn handle_request(&self, block: Block) {
        if !block.op_type.is_request() {
            tracing::warn!(
                "Dropping unexpected {:?} block for callid {}",
                block.op_type,
                block.callid
            );
            return;
        }

        let request = match Dict::unserialize(&block.payload) {
            Ok(dict) => dict,
            Err(e) => {
                tracing::debug!("callid {}: bad request payload: {}", block.callid, e);
                self.reply_status(&block, -1, e.errno());
                return;
            }
        };

        match self.shared.table.lookup(block.op_type, block.op) {
            Ok(Handler::Fop(handler)) => self.dispatch_fop(&block, handler, &request),
            Ok(Handler::Mgmt(op)) => {
                tracing::debug!("callid {}: {}", block.callid, op);
                let reply = mgmt::handle(self, op, &request);
                self.send(block.reply(reply.serialize()));
            }
            Err(e) => {
                tracing::debug!("callid {}: {}", block.callid, e);
                self.reply_status(&block, -1, e.errno());
            }
        }
    }

    fn dispatch_fop(&self, block: &Block, handler: FopHandler, request: &Dict) {
        let fop = handler.fop;
        let Some(subvolume) = self.bound_subvolume() else {
            tracing::debug!("callid {}: {} before SETVOLUME", block.callid, fop);
            self.reply_status(block, -1, GlusterError::NotConnected.errno());
            return;
        };

        let prepared = stack_init(request, block.callid, fop)
            .and_then(|init| Ok((init, (handler.unmarshal)(request, &self.fds)?)));
        let (init, args) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::debug!("callid {}: {} rejected: {}", block.callid, fop, e);
                self.reply_status(block, -1, e.errno());
                return;
            }
        };

        if matches!(fop, Fop::Close | Fop::Closedir) {
            if let Ok(no) = request.require_int(keys::FD) {
                self.fds.remove(no);
            }
        }

        let root = match self
            .shared
            .pool
            .create_stack_with(self.shared.this.clone(), init)
        {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!("callid {}: cannot create stack for {}: {}", block.callid, fop, e);
                self.reply_status(block, -1, e.errno());
                return;
            }
        };

        tracing::trace!("callid {}: wind {} to {}", block.callid, fop, subvolume.name());

        let reply_to = Block::new(block.op_type, block.op, block.callid, Bytes::new());
        let sink = self.sink.clone();
        let fds = self.fds.clone();
        let target = subvolume.clone();
        root.wind(&subvolume, args, move |root, _cookie, reply| {
            let dict = match marshal_reply(&reply, &fds) {
                Ok(dict) => dict,
                Err(e) => {
                    tracing::warn!("callid {}: cannot marshal {} reply: {}", reply_to.callid, fop, e);
                    if let FopOutput::Fd { fd, .. } = reply.output {
                        close_orphan(&root, &target, fd);
                    }
                    status_dict(-1, e.errno())
                }
            };
            send(sink.as_ref(), reply_to.reply(dict.serialize()));

            // Frames still in flight (an early ack, an expired timeout)
            // finish the destroy when they unwind.
            if let Err(e) = root.stack().destroy_when_idle() {
                tracing::warn!("callid {}: stack not destroyed: {}", reply_to.callid, e);
            }
        });
    }

    fn reply_status(&self, block: &Block, op_ret: i32, op_errno: i32) {
        self.send(block.reply(status_dict(op_ret, op_errno).serialize()));
    }

    fn send(&self, block: Block) {
        send(self.sink.as_ref(), block);
    }

    /// Bind the connection to the subvolume called `name`.
    pub fn bind(&self, name: &str) -> Result<()> {
        let subvolume = self
            .shared
            .subvolumes
            .iter()
            .find(|xl| xl.name() == name)
            .cloned()
            .ok_or_else(|| GlusterError::Config(format!("no subvolume named {name}")))?;
        *self.bound.write().unwrap_or_else(|e| e.into_inner()) = Some(subvolume);
        Ok(())
    }

    /// Subvolume fops are wound into, once bound.
    pub fn bound_subvolume(&self) -> Option<Arc<dyn Xlator>> {
        self.bound
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The server's call pool.
    pub fn pool(&self) -> &Arc<CallPool> {
        &self.shared.pool
    }

    /// Volume specification served by GETSPEC.
    pub fn spec(&self) -> Option<&str> {
        self.shared.config.spec.as_deref()
    }

    /// Number of files this connection holds open.
    pub fn open_fds(&self) -> usize {
        self.fds.len()
    }

    /// Release every fd the client left open. Returns how many there were.
    pub fn shutdown(&self) -> usize {
        let released = self.fds.drain().len();
        if released > 0 {
            tracing::debug!("connection closed with {} open fd(s)", released);
        }
        released
    }
}

/// Close a file the subvolume opened but the client will never learn of.
fn close_orphan(root: &CallFrame, subvolume: &Arc<dyn Xlator>, fd: Arc<Fd>) {
    tracing::warn!("closing orphaned fd for {}", fd.path());
    let args = match fd.kind() {
        FdKind::Dir => FopArgs::Closedir { fd },
        FdKind::File => FopArgs::Close { fd },
    };
    root.wind(subvolume, args, |_, _, reply| {
        if reply.is_error() {
            tracing::debug!("orphan close failed: errno {}", reply.op_errno);
        }
    });
}

fn send(sink: &dyn ReplySink, block: Block) {
    let callid = block.callid;
    if let Err(e) = sink.send_reply(block) {
        tracing::error!("callid {}: failed to queue reply: {}", callid, e);
    }
}

/// Caller identity for the request's stack.
///
/// Credentials are optional and default to 0; a present but mistyped value
/// rejects the request.
fn stack_init(request: &Dict, callid: u64, fop: Fop) -> Result<StackInit> {
    let groups = match request.optional_bytes(keys::CALLER_GROUPS)? {
        Some(raw) => MsgPackCodec::decode::<Vec<u32>>(raw)?,
        None => Vec::new(),
    };
    let lk_owner = if fop.is_locking() {
        request.optional_int(keys::LK_OWNER)?.unwrap_or(0) as u64
    } else {
        0
    };

    Ok(StackInit {
        unique: Some(callid),
        creds: Credentials {
            uid: optional_narrow(request, keys::CALLER_UID)?.unwrap_or(0),
            gid: optional_narrow(request, keys::CALLER_GID)?.unwrap_or(0),
            pid: optional_narrow(request, keys::CALLER_PID)?.unwrap_or(0),
            groups,
        },
        lk_owner,
        op: Some(fop),
    })
}
