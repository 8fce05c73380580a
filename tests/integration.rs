//! Integration tests for glusterfs-core.
//!
//! These drive a [`Connection`] the way a transport would: request blocks
//! in, reply blocks out through a collecting sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use glusterfs_core::error::{GlusterError, Result};
use glusterfs_core::protocol::{Block, BlockBuffer, Dict, Fop, MgmtOp, OpType};
use glusterfs_core::server::{encode_groups, keys, Connection, Server};
use glusterfs_core::stack::{arm_timeout, dump_pending, CallFrame, CallPool, Cookie, PoolConfig};
use glusterfs_core::transport::ReplySink;
use glusterfs_core::xlator::{Fd, FopArgs, FopOutput, FopReply, Stat, Xlator};

/// Sink keeping every reply for inspection.
#[derive(Default)]
struct Collect(Mutex<Vec<Block>>);

impl Collect {
    fn take(&self) -> Vec<Block> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl ReplySink for Collect {
    fn send_reply(&self, block: Block) -> Result<()> {
        self.0.lock().unwrap().push(block);
        Ok(())
    }
}

/// In-memory leaf answering every fop immediately.
#[derive(Default)]
struct Posix {
    winds: AtomicUsize,
    closed: AtomicUsize,
}

impl Xlator for Posix {
    fn name(&self) -> &str {
        "posix"
    }

    fn fop(&self, frame: CallFrame, args: FopArgs) {
        self.winds.fetch_add(1, Ordering::SeqCst);
        if matches!(args, FopArgs::Close { .. } | FopArgs::Closedir { .. }) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        let reply = match args {
            FopArgs::Open { path, flags, .. } | FopArgs::Create { path, flags, .. } => {
                FopReply::ok(
                    0,
                    FopOutput::Fd {
                        fd: Arc::new(Fd::file(path, flags)),
                        stat: Some(Stat::default()),
                    },
                )
            }
            FopArgs::Opendir { path } => FopReply::ok(
                0,
                FopOutput::Fd {
                    fd: Arc::new(Fd::dir(path)),
                    stat: None,
                },
            ),
            FopArgs::Stat { path } if path == "/missing" => FopReply::error(libc::ENOENT),
            FopArgs::Stat { .. } | FopArgs::Fstat { .. } => {
                FopReply::ok(0, FopOutput::Stat(Stat::default()))
            }
            FopArgs::Read { size, .. } => FopReply::ok(
                size as i32,
                FopOutput::Read {
                    data: Bytes::from(vec![b'x'; size as usize]),
                    stat: Stat::default(),
                },
            ),
            _ => FopReply::done(),
        };
        frame.unwind(reply).unwrap();
    }
}

/// Leaf that holds every frame until the test unwinds it.
#[derive(Default)]
struct Parking {
    name: &'static str,
    parked: Mutex<Vec<CallFrame>>,
}

impl Parking {
    fn named(name: &'static str) -> Self {
        Self {
            name,
            parked: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> Vec<CallFrame> {
        std::mem::take(&mut *self.parked.lock().unwrap())
    }
}

impl Xlator for Parking {
    fn name(&self) -> &str {
        self.name
    }

    fn fop(&self, frame: CallFrame, _args: FopArgs) {
        self.parked.lock().unwrap().push(frame);
    }
}

/// Acknowledges every fop before its child has answered.
struct EarlyAck {
    child: Arc<dyn Xlator>,
}

impl Xlator for EarlyAck {
    fn name(&self) -> &str {
        "early-ack"
    }

    fn fop(&self, frame: CallFrame, args: FopArgs) {
        frame.wind(&self.child, args, |_, _, _| {});
        frame.unwind(FopReply::done()).unwrap();
    }
}

/// Fans every fop out to all children and unwinds once all have answered.
struct Replicate {
    children: Vec<Arc<dyn Xlator>>,
    order: Arc<Mutex<Vec<u64>>>,
}

impl Xlator for Replicate {
    fn name(&self) -> &str {
        "replicate"
    }

    fn children(&self) -> &[Arc<dyn Xlator>] {
        &self.children
    }

    fn fop(&self, frame: CallFrame, args: FopArgs) {
        for (i, child) in self.children.iter().enumerate() {
            let order = self.order.clone();
            frame.wind_cookie(i as u64, child, args.clone(), move |frame, cookie, reply| {
                assert!(!reply.is_error());
                if let Cookie::User(i) = cookie {
                    order.lock().unwrap().push(i);
                }
                if frame.ref_count() == 0 {
                    let answered = order.lock().unwrap().len() as i32;
                    frame.unwind(FopReply::ok(answered, FopOutput::None)).unwrap();
                }
            });
        }
    }
}

fn request(fop: Fop, callid: u64, args: &[(&str, glusterfs_core::Value)]) -> Block {
    let mut dict = Dict::new();
    dict.set(keys::CALLER_UID, 1000i64);
    dict.set(keys::CALLER_GID, 100i64);
    dict.set(keys::CALLER_PID, 4242i64);
    for (key, value) in args {
        dict.set(*key, value.clone());
    }
    Block::new(OpType::FopRequest, fop.code(), callid, dict.serialize())
}

fn mgmt(op: MgmtOp, callid: u64, dict: Dict) -> Block {
    Block::new(OpType::MgmtRequest, op.code(), callid, dict.serialize())
}

fn reply_dict(block: &Block) -> Dict {
    Dict::unserialize(block.payload()).unwrap()
}

fn status(block: &Block) -> (i64, i64) {
    let dict = reply_dict(block);
    (
        dict.require_int(keys::RET).unwrap(),
        dict.require_int(keys::ERRNO).unwrap(),
    )
}

fn setup(subvolume: Arc<dyn Xlator>) -> (Server, Connection, Arc<Collect>) {
    let server = Server::builder().subvolume(subvolume).build().unwrap();
    let sink = Arc::new(Collect::default());
    let conn = server.connection(sink.clone());
    (server, conn, sink)
}

/// Test open, read and close through the fd table.
#[test]
fn test_open_read_close() {
    let (server, conn, sink) = setup(Arc::new(Posix::default()));

    conn.handle_request(request(Fop::Open, 1, &[(keys::PATH, "/a".into()), (keys::FLAGS, 0i64.into())]));
    conn.handle_request(request(Fop::Open, 2, &[(keys::PATH, "/b".into()), (keys::FLAGS, 0i64.into())]));

    let replies = sink.take();
    assert_eq!(replies.len(), 2);
    assert_eq!(reply_dict(&replies[0]).require_int(keys::FD).unwrap(), 0);
    assert_eq!(reply_dict(&replies[1]).require_int(keys::FD).unwrap(), 1);
    assert!(reply_dict(&replies[0]).contains_key(keys::STAT));
    assert_eq!(conn.open_fds(), 2);

    conn.handle_request(request(
        Fop::Read,
        3,
        &[
            (keys::FD, 0i64.into()),
            (keys::LEN, 4i64.into()),
            (keys::OFFSET, 0i64.into()),
        ],
    ));
    let replies = sink.take();
    let dict = reply_dict(&replies[0]);
    assert_eq!(dict.require_int(keys::RET).unwrap(), 4);
    assert_eq!(&dict.require_bytes(keys::BUF).unwrap()[..], b"xxxx");

    conn.handle_request(request(Fop::Close, 4, &[(keys::FD, 0i64.into())]));
    assert_eq!(status(&sink.take()[0]), (0, 0));
    assert_eq!(conn.open_fds(), 1);

    // Lowest free number is reused.
    conn.handle_request(request(Fop::Open, 5, &[(keys::PATH, "/c".into()), (keys::FLAGS, 0i64.into())]));
    assert_eq!(reply_dict(&sink.take()[0]).require_int(keys::FD).unwrap(), 0);

    assert_eq!(server.pool().count(), 0);
    assert_eq!(server.pool().total_count(), 5);
    assert_eq!(conn.shutdown(), 2);
}

/// Test that a request missing a required key is never wound.
#[test]
fn test_missing_key_is_einval_without_wind() {
    let posix = Arc::new(Posix::default());
    let (server, conn, sink) = setup(posix.clone());

    conn.handle_request(request(Fop::Read, 7, &[(keys::LEN, 16i64.into())]));

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].op_type, OpType::FopReply);
    assert_eq!(replies[0].callid, 7);
    assert_eq!(status(&replies[0]), (-1, libc::EINVAL as i64));
    assert_eq!(posix.winds.load(Ordering::SeqCst), 0);
    assert_eq!(server.pool().total_count(), 0);
}

/// Test that an unknown fd number fails with EBADF.
#[test]
fn test_unknown_fd_is_ebadf() {
    let posix = Arc::new(Posix::default());
    let (_server, conn, sink) = setup(posix.clone());

    conn.handle_request(request(Fop::Fstat, 1, &[(keys::FD, 9i64.into())]));

    assert_eq!(status(&sink.take()[0]), (-1, libc::EBADF as i64));
    assert_eq!(posix.winds.load(Ordering::SeqCst), 0);
}

/// Test a request without caller credentials runs as uid 0.
#[test]
fn test_open_without_credentials() {
    struct Opened(Mutex<Vec<(u32, u32, i32)>>);

    impl Xlator for Opened {
        fn name(&self) -> &str {
            "opened"
        }

        fn fop(&self, frame: CallFrame, _args: FopArgs) {
            let creds = frame.stack().creds();
            self.0.lock().unwrap().push((creds.uid, creds.gid, creds.pid));
            frame.unwind(FopReply::ok(3, FopOutput::None)).unwrap();
        }
    }

    let leaf = Arc::new(Opened(Mutex::new(Vec::new())));
    let (server, conn, sink) = setup(leaf.clone());

    let mut dict = Dict::new();
    dict.set(keys::PATH, "/a");
    dict.set(keys::FLAGS, 0i64);
    dict.set(keys::MODE, 0o644i64);
    conn.handle_request(Block::new(
        OpType::FopRequest,
        Fop::Open.code(),
        11,
        dict.serialize(),
    ));

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].op_type, OpType::FopReply);
    assert_eq!(replies[0].op, Fop::Open.code());
    assert_eq!(replies[0].callid, 11);
    assert_eq!(status(&replies[0]), (3, 0));
    assert_eq!(*leaf.0.lock().unwrap(), vec![(0, 0, 0)]);
    assert_eq!(server.pool().count(), 0);
}

/// Test that a mistyped credential is rejected before anything is wound.
#[test]
fn test_mistyped_credentials_is_einval() {
    let posix = Arc::new(Posix::default());
    let (_server, conn, sink) = setup(posix.clone());

    let mut dict = Dict::new();
    dict.set(keys::PATH, "/");
    dict.set(keys::CALLER_UID, "root");
    conn.handle_request(Block::new(
        OpType::FopRequest,
        Fop::Stat.code(),
        1,
        dict.serialize(),
    ));

    assert_eq!(status(&sink.take()[0]), (-1, libc::EINVAL as i64));
    assert_eq!(posix.winds.load(Ordering::SeqCst), 0);
}

/// Test that unknown op-codes are answered with ENOSYS.
#[test]
fn test_unknown_op_is_enosys() {
    let (_server, conn, sink) = setup(Arc::new(Posix::default()));

    conn.handle_request(Block::new(
        OpType::FopRequest,
        999,
        11,
        Dict::new().serialize(),
    ));
    conn.handle_request(Block::new(
        OpType::CbkRequest,
        0,
        12,
        Dict::new().serialize(),
    ));

    let replies = sink.take();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].op, 999);
    assert_eq!(replies[0].callid, 11);
    assert_eq!(replies[1].op_type, OpType::CbkReply);
    for reply in &replies {
        assert_eq!(status(reply), (-1, libc::ENOSYS as i64));
    }
}

/// Test that every fop answers exactly once, valid arguments or not.
#[test]
fn test_every_fop_replies_once() {
    let (server, conn, sink) = setup(Arc::new(Posix::default()));

    for (i, fop) in Fop::ALL.iter().enumerate() {
        let callid = 1000 + i as u64;
        conn.handle_request(request(*fop, callid, &[]));

        let replies = sink.take();
        assert_eq!(replies.len(), 1, "{fop}");
        assert_eq!(replies[0].op_type, OpType::FopReply);
        assert_eq!(replies[0].op, fop.code());
        assert_eq!(replies[0].callid, callid);
        assert_eq!(status(&replies[0]), (-1, libc::EINVAL as i64), "{fop}");
    }

    conn.handle_request(request(Fop::Lookup, 1, &[(keys::PATH, "/".into())]));
    conn.handle_request(request(Fop::Stat, 2, &[(keys::PATH, "/".into())]));
    assert_eq!(sink.take().len(), 2);
    assert_eq!(server.pool().count(), 0);
}

/// Test garbage and reply-typed blocks are dropped without a reply.
#[test]
fn test_undecodable_block_dropped() {
    let (_server, conn, sink) = setup(Arc::new(Posix::default()));

    conn.handle_bytes(b"definitely not a block");
    conn.handle_request(Block::new(OpType::FopReply, 0, 1, Bytes::new()));

    assert!(sink.take().is_empty());
}

/// Test a corrupt dictionary payload still gets a reply.
#[test]
fn test_bad_payload_is_einval() {
    let (_server, conn, sink) = setup(Arc::new(Posix::default()));

    let block = request(Fop::Stat, 5, &[(keys::PATH, "/".into())]);
    let truncated = block.payload.slice(..block.payload.len() - 3);
    conn.handle_request(Block::new(OpType::FopRequest, block.op, 5, truncated));

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(status(&replies[0]), (-1, libc::EINVAL as i64));
}

/// Test the error of a failed fop is forwarded to the client.
#[test]
fn test_fop_error_forwarded() {
    let (server, conn, sink) = setup(Arc::new(Posix::default()));

    conn.handle_request(request(Fop::Stat, 1, &[(keys::PATH, "/missing".into())]));

    assert_eq!(status(&sink.take()[0]), (-1, libc::ENOENT as i64));
    assert_eq!(server.pool().count(), 0);
}

/// Test a fan-out translator whose children answer in reverse order.
#[test]
fn test_fan_out_reverse_unwind() {
    let left = Arc::new(Parking::named("left"));
    let right = Arc::new(Parking::named("right"));
    let order = Arc::new(Mutex::new(Vec::new()));
    let replicate = Arc::new(Replicate {
        children: vec![left.clone(), right.clone()],
        order: order.clone(),
    });
    let (server, conn, sink) = setup(replicate);

    conn.handle_request(request(Fop::Stat, 77, &[(keys::PATH, "/f".into())]));
    assert!(sink.take().is_empty());
    assert_eq!(server.pool().count(), 1);

    let dump = dump_pending(server.pool()).unwrap();
    assert_eq!(dump.stacks.len(), 1);
    assert_eq!(dump.stacks[0].unique, 77);
    assert_eq!(dump.stacks[0].uid, 1000);
    assert_eq!(dump.stacks[0].frames.len(), 4);
    assert!(dump.to_json().unwrap().contains("replicate"));

    let mut parked = left.take();
    parked.extend(right.take());
    assert_eq!(parked.len(), 2);
    let stack = parked[0].stack().clone();
    assert_eq!(stack.pending_frames(), 3);

    parked[1].unwind(FopReply::done()).unwrap();
    assert!(sink.take().is_empty());
    parked[0].unwind(FopReply::done()).unwrap();

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].callid, 77);
    assert_eq!(status(&replies[0]), (2, 0));
    assert_eq!(*order.lock().unwrap(), vec![1, 0]);

    assert!(stack.is_destroyed());
    assert_eq!(server.pool().count(), 0);
    assert_eq!(server.pool().frames_in_use(), 0);

    // The stack is gone; late answers are rejected.
    assert!(matches!(
        parked[0].unwind(FopReply::done()),
        Err(GlusterError::UnknownFrame(_))
    ));
}

/// Test request identity lands on the stack.
#[test]
fn test_stack_identity() {
    let parking = Arc::new(Parking::named("locks"));
    let (_server, conn, sink) = setup(parking.clone());

    conn.handle_request(request(
        Fop::Stat,
        31,
        &[
            (keys::PATH, "/".into()),
            (keys::CALLER_GROUPS, encode_groups(&[10, 20]).unwrap().into()),
            (keys::LK_OWNER, 99i64.into()),
        ],
    ));

    let frames = parking.take();
    let stack = frames[0].stack();
    assert_eq!(stack.unique(), 31);
    assert_eq!(stack.op(), Some(Fop::Stat));
    assert_eq!(stack.creds().uid, 1000);
    assert_eq!(stack.creds().gid, 100);
    assert_eq!(stack.creds().pid, 4242);
    assert_eq!(stack.creds().groups, vec![10, 20]);
    // Only locking fops carry the lock owner.
    assert_eq!(stack.lk_owner(), 0);

    frames[0].unwind(FopReply::done()).unwrap();
    assert_eq!(sink.take().len(), 1);
}

/// Test that the stack budget turns into an ENOMEM reply.
#[test]
fn test_stack_budget_exhausted() {
    let parking = Arc::new(Parking::named("slow"));
    let pool = CallPool::with_config(PoolConfig {
        max_stacks: 1,
        ..PoolConfig::default()
    });
    let server = Server::builder()
        .subvolume(parking.clone())
        .pool(pool.clone())
        .build()
        .unwrap();
    let sink = Arc::new(Collect::default());
    let conn = server.connection(sink.clone());

    conn.handle_request(request(Fop::Stat, 1, &[(keys::PATH, "/".into())]));
    conn.handle_request(request(Fop::Stat, 2, &[(keys::PATH, "/".into())]));

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].callid, 2);
    assert_eq!(status(&replies[0]), (-1, libc::ENOMEM as i64));

    for frame in parking.take() {
        frame.unwind(FopReply::done()).unwrap();
    }
    assert_eq!(sink.take()[0].callid, 1);

    conn.handle_request(request(Fop::Stat, 3, &[(keys::PATH, "/".into())]));
    assert_eq!(parking.take().len(), 1);
}

/// Test that the frame budget fails the wind, not the request.
#[test]
fn test_frame_budget_exhausted() {
    let posix = Arc::new(Posix::default());
    let server = Server::builder()
        .subvolume(posix.clone())
        .pool_config(PoolConfig {
            max_frames: 1,
            ..PoolConfig::default()
        })
        .build()
        .unwrap();
    let sink = Arc::new(Collect::default());
    let conn = server.connection(sink.clone());

    conn.handle_request(request(Fop::Stat, 1, &[(keys::PATH, "/".into())]));

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(status(&replies[0]), (-1, libc::ENOMEM as i64));
    assert_eq!(posix.winds.load(Ordering::SeqCst), 0);
    assert_eq!(server.pool().count(), 0);
}

/// Test UNWIND of a completed frame is rejected and the stack stays busy
/// until every frame has answered.
#[test]
fn test_double_unwind_and_busy_destroy() {
    let parking = Arc::new(Parking::named("slow"));
    let child: Arc<dyn Xlator> = parking.clone();
    let pool = CallPool::new();
    let root = pool.create_stack(Arc::new(Parking::named("root"))).unwrap();

    let replies = Arc::new(AtomicUsize::new(0));
    let counter = replies.clone();
    root.wind(&child, FopArgs::Stat { path: "/".into() }, move |_root, _cookie, _reply| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(root.ref_count(), 1);
    assert!(matches!(
        root.stack().destroy(),
        Err(GlusterError::StackBusy { pending: 1 })
    ));
    assert!(matches!(
        root.unwind(FopReply::done()),
        Err(GlusterError::RootFrame)
    ));

    let frame = parking.take().remove(0);
    frame.unwind(FopReply::done()).unwrap();
    assert!(matches!(
        frame.unwind(FopReply::done()),
        Err(GlusterError::AlreadyComplete(_))
    ));
    assert_eq!(replies.load(Ordering::SeqCst), 1);
    assert_eq!(root.ref_count(), 0);

    root.stack().destroy().unwrap();
    assert!(matches!(
        root.stack().destroy(),
        Err(GlusterError::StackDestroyed)
    ));
    assert_eq!(pool.count(), 0);
}

/// Test a reply sent before every frame has answered still frees the stack.
#[test]
fn test_early_ack_frees_stack_after_children() {
    let parking = Arc::new(Parking::named("slow"));
    let (server, conn, sink) = setup(Arc::new(EarlyAck {
        child: parking.clone(),
    }));

    conn.handle_request(request(Fop::Stat, 1, &[(keys::PATH, "/".into())]));

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(status(&replies[0]), (0, 0));
    assert_eq!(server.pool().count(), 1);
    assert_eq!(server.pool().frames_in_use(), 3);

    let frame = parking.take().remove(0);
    assert!(!frame.stack().is_destroyed());
    frame.unwind(FopReply::done()).unwrap();

    assert!(frame.stack().is_destroyed());
    assert_eq!(server.pool().count(), 0);
    assert_eq!(server.pool().frames_in_use(), 0);
    assert!(sink.take().is_empty());
}

/// Test a file opened into a full fd table is closed again.
#[test]
fn test_full_fd_table_closes_orphan() {
    let posix = Arc::new(Posix::default());
    let server = Server::builder()
        .subvolume(posix.clone())
        .max_fds(1)
        .build()
        .unwrap();
    let sink = Arc::new(Collect::default());
    let conn = server.connection(sink.clone());

    conn.handle_request(request(Fop::Open, 1, &[(keys::PATH, "/a".into()), (keys::FLAGS, 0i64.into())]));
    conn.handle_request(request(Fop::Open, 2, &[(keys::PATH, "/b".into()), (keys::FLAGS, 0i64.into())]));

    let replies = sink.take();
    assert_eq!(replies.len(), 2);
    assert_eq!(reply_dict(&replies[0]).require_int(keys::FD).unwrap(), 0);
    assert_eq!(status(&replies[1]), (-1, libc::ENOMEM as i64));
    assert!(!reply_dict(&replies[1]).contains_key(keys::FD));

    assert_eq!(posix.winds.load(Ordering::SeqCst), 3);
    assert_eq!(posix.closed.load(Ordering::SeqCst), 1);
    assert_eq!(conn.open_fds(), 1);
    assert_eq!(server.pool().count(), 0);
}

/// Test a read larger than one dict value is refused up front.
#[test]
fn test_oversize_read_is_einval() {
    let posix = Arc::new(Posix::default());
    let (_server, conn, sink) = setup(posix.clone());

    conn.handle_request(request(Fop::Open, 1, &[(keys::PATH, "/a".into()), (keys::FLAGS, 0i64.into())]));
    sink.take();

    let len = 2 * glusterfs_core::protocol::DICT_KEY_VALUE_MAX_SIZE as i64;
    conn.handle_request(request(
        Fop::Read,
        2,
        &[
            (keys::FD, 0i64.into()),
            (keys::LEN, len.into()),
            (keys::OFFSET, 0i64.into()),
        ],
    ));

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(status(&replies[0]), (-1, libc::EINVAL as i64));
    assert_eq!(posix.winds.load(Ordering::SeqCst), 1);
}

/// Test the SETVOLUME handshake, GETSPEC and STATS.
#[test]
fn test_mgmt_ops() {
    let posix = Arc::new(Posix::default());
    let server = Server::builder()
        .subvolume(posix)
        .spec("volume posix\n  type storage/posix\nend-volume\n")
        .require_handshake(true)
        .build()
        .unwrap();
    let sink = Arc::new(Collect::default());
    let conn = server.connection(sink.clone());

    conn.handle_request(request(Fop::Stat, 1, &[(keys::PATH, "/".into())]));
    assert_eq!(status(&sink.take()[0]), (-1, libc::ENOTCONN as i64));

    let mut bad = Dict::new();
    bad.set(keys::REMOTE_SUBVOLUME, "nope");
    conn.handle_request(mgmt(MgmtOp::Setvolume, 2, bad));
    let replies = sink.take();
    assert_eq!(replies[0].op_type, OpType::MgmtReply);
    assert_eq!(status(&replies[0]), (-1, libc::ENOENT as i64));
    assert!(conn.bound_subvolume().is_none());

    let mut good = Dict::new();
    good.set(keys::REMOTE_SUBVOLUME, "posix");
    conn.handle_request(mgmt(MgmtOp::Setvolume, 3, good));
    let dict = reply_dict(&sink.take()[0]);
    assert_eq!(dict.require_int(keys::RET).unwrap(), 0);
    assert_eq!(dict.require_str(keys::ERROR).unwrap(), "Success");

    conn.handle_request(request(Fop::Opendir, 4, &[(keys::PATH, "/".into())]));
    assert_eq!(status(&sink.take()[0]), (0, 0));

    conn.handle_request(mgmt(MgmtOp::Getspec, 5, Dict::new()));
    let dict = reply_dict(&sink.take()[0]);
    let spec = dict.require_str(keys::SPEC_FILE_CONTENTS).unwrap();
    assert!(spec.starts_with("volume posix"));
    assert_eq!(dict.require_int(keys::RET).unwrap(), spec.len() as i64);

    conn.handle_request(mgmt(MgmtOp::Stats, 6, Dict::new()));
    let dict = reply_dict(&sink.take()[0]);
    assert_eq!(dict.require_int(keys::CALL_COUNT).unwrap(), 0);
    assert_eq!(dict.require_int(keys::TOTAL_COUNT).unwrap(), 1);
    assert_eq!(dict.require_int(keys::OPEN_FDS).unwrap(), 1);

    conn.handle_request(mgmt(MgmtOp::Getvolume, 7, Dict::new()));
    assert_eq!(status(&sink.take()[0]), (-1, libc::ENOSYS as i64));

    // SETSPEC, LOCK, UNLOCK, LISTLOCKS and FSCK are not served.
    let served = MgmtOp::ALL.len() as u16;
    for op in served..served + 5 {
        conn.handle_request(Block::new(OpType::MgmtRequest, op, 8, Dict::new().serialize()));
        let replies = sink.take();
        assert_eq!(replies[0].op_type, OpType::MgmtReply);
        assert_eq!(status(&replies[0]), (-1, libc::ENOSYS as i64));
    }
}

/// Test a timeout answers a stuck request on the client's behalf.
#[tokio::test(start_paused = true)]
async fn test_timeout_answers_stuck_request() {
    let parking = Arc::new(Parking::named("stuck"));
    let (server, conn, sink) = setup(parking.clone());

    conn.handle_request(request(Fop::Stat, 9, &[(keys::PATH, "/".into())]));
    let frame = parking.take().remove(0);

    let timer = arm_timeout(frame.clone(), Duration::from_secs(30));
    assert!(timer.await.unwrap());

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(status(&replies[0]), (-1, libc::ETIMEDOUT as i64));
    assert_eq!(server.pool().count(), 0);

    // The late answer has nowhere to go.
    assert!(frame.unwind(FopReply::done()).is_err());
    assert!(sink.take().is_empty());
}

/// Test a full session over an in-memory stream.
#[tokio::test]
async fn test_serve_over_stream() {
    let posix = Arc::new(Posix::default());
    let server = Server::builder().subvolume(posix.clone()).build().unwrap();

    let (mut client, server_side) = tokio::io::duplex(64 * 1024);
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(server_side).await })
    };

    let mut wire = Vec::new();
    wire.extend(request(Fop::Open, 1, &[(keys::PATH, "/s".into()), (keys::FLAGS, 0i64.into())]).serialize());
    wire.extend(request(Fop::Stat, 2, &[(keys::PATH, "/missing".into())]).serialize());
    wire.extend(Block::new(OpType::FopRequest, 4242, 3, Dict::new().serialize()).serialize());

    // Split a block across writes.
    let (head, tail) = wire.split_at(25);
    client.write_all(head).await.unwrap();
    tokio::task::yield_now().await;
    client.write_all(tail).await.unwrap();

    let mut buffer = BlockBuffer::new();
    let mut replies = Vec::new();
    let mut buf = vec![0u8; 4096];
    while replies.len() < 3 {
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0);
        replies.extend(buffer.push(&buf[..n]).unwrap());
    }

    assert_eq!(replies[0].callid, 1);
    assert_eq!(reply_dict(&replies[0]).require_int(keys::FD).unwrap(), 0);
    assert_eq!(status(&replies[1]), (-1, libc::ENOENT as i64));
    assert_eq!(status(&replies[2]), (-1, libc::ENOSYS as i64));

    client.shutdown().await.unwrap();
    drop(client);
    serving.await.unwrap().unwrap();
    assert_eq!(server.pool().count(), 0);
}

/// Test a disconnect returns while a request is still running.
#[tokio::test]
async fn test_serve_returns_with_request_in_flight() {
    let parking = Arc::new(Parking::named("stuck"));
    let server = Server::builder()
        .subvolume(parking.clone())
        .drain_timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let (mut client, server_side) = tokio::io::duplex(4096);
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(server_side).await })
    };

    client
        .write_all(&request(Fop::Stat, 1, &[(keys::PATH, "/".into())]).serialize())
        .await
        .unwrap();
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("serve did not return")
        .unwrap()
        .unwrap();

    // The late reply is refused; the stack is still freed.
    let frame = parking.take().remove(0);
    assert_eq!(server.pool().count(), 1);
    frame.unwind(FopReply::done()).unwrap();
    assert_eq!(server.pool().count(), 0);
}

/// Test a framing error closes the connection.
#[tokio::test]
async fn test_serve_rejects_bad_signature() {
    let server = Server::builder()
        .subvolume(Arc::new(Posix::default()))
        .build()
        .unwrap();
    let (mut client, server_side) = tokio::io::duplex(1024);
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(server_side).await })
    };

    client.write_all(&[0xAB; 64]).await.unwrap();

    let result = serving.await.unwrap();
    assert!(matches!(result, Err(GlusterError::Decode(_))));
}
