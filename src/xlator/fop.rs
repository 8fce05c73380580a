//! Fop arguments, results and the structured types they carry.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::Fd;
use crate::protocol::{Dict, Fop};

/// Seconds and nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

/// File attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// Filesystem statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

/// One directory entry returned by READDIR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub offset: u64,
    pub stat: Stat,
}

/// POSIX record lock description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flock {
    pub lock_type: i16,
    pub whence: i16,
    pub start: i64,
    pub len: i64,
    pub pid: i32,
}

/// Arguments of one filesystem operation.
#[derive(Debug, Clone)]
pub enum FopArgs {
    Stat { path: String },
    Readlink { path: String, size: u64 },
    Mknod { path: String, mode: u32, dev: u64 },
    Mkdir { path: String, mode: u32 },
    Unlink { path: String },
    Rmdir { path: String },
    Symlink { target: String, path: String },
    Rename { oldpath: String, newpath: String },
    Link { oldpath: String, newpath: String },
    Chmod { path: String, mode: u32 },
    Chown { path: String, uid: u32, gid: u32 },
    Truncate { path: String, offset: u64 },
    Open { path: String, flags: i32, mode: u32 },
    Read { fd: Arc<Fd>, size: u64, offset: u64 },
    Write { fd: Arc<Fd>, data: Bytes, offset: u64 },
    Statfs { path: String },
    Flush { fd: Arc<Fd> },
    Close { fd: Arc<Fd> },
    Fsync { fd: Arc<Fd>, datasync: bool },
    Setxattr { path: String, xattrs: Dict, flags: i32 },
    Getxattr { path: String, name: Option<String> },
    Removexattr { path: String, name: String },
    Opendir { path: String },
    Readdir { fd: Arc<Fd>, size: u64, offset: u64 },
    Closedir { fd: Arc<Fd> },
    Fsyncdir { fd: Arc<Fd>, datasync: bool },
    Access { path: String, mask: u32 },
    Create { path: String, flags: i32, mode: u32 },
    Ftruncate { fd: Arc<Fd>, offset: u64 },
    Fstat { fd: Arc<Fd> },
    Lk { fd: Arc<Fd>, cmd: i32, lock: Flock },
    Utimens { path: String, atime: Timespec, mtime: Timespec },
    Fchmod { fd: Arc<Fd>, mode: u32 },
    Fchown { fd: Arc<Fd>, uid: u32, gid: u32 },
    Lookup { path: String, need_xattr: bool },
}

impl FopArgs {
    /// The operation these arguments belong to.
    pub fn fop(&self) -> Fop {
        match self {
            FopArgs::Stat { .. } => Fop::Stat,
            FopArgs::Readlink { .. } => Fop::Readlink,
            FopArgs::Mknod { .. } => Fop::Mknod,
            FopArgs::Mkdir { .. } => Fop::Mkdir,
            FopArgs::Unlink { .. } => Fop::Unlink,
            FopArgs::Rmdir { .. } => Fop::Rmdir,
            FopArgs::Symlink { .. } => Fop::Symlink,
            FopArgs::Rename { .. } => Fop::Rename,
            FopArgs::Link { .. } => Fop::Link,
            FopArgs::Chmod { .. } => Fop::Chmod,
            FopArgs::Chown { .. } => Fop::Chown,
            FopArgs::Truncate { .. } => Fop::Truncate,
            FopArgs::Open { .. } => Fop::Open,
            FopArgs::Read { .. } => Fop::Read,
            FopArgs::Write { .. } => Fop::Write,
            FopArgs::Statfs { .. } => Fop::Statfs,
            FopArgs::Flush { .. } => Fop::Flush,
            FopArgs::Close { .. } => Fop::Close,
            FopArgs::Fsync { .. } => Fop::Fsync,
            FopArgs::Setxattr { .. } => Fop::Setxattr,
            FopArgs::Getxattr { .. } => Fop::Getxattr,
            FopArgs::Removexattr { .. } => Fop::Removexattr,
            FopArgs::Opendir { .. } => Fop::Opendir,
            FopArgs::Readdir { .. } => Fop::Readdir,
            FopArgs::Closedir { .. } => Fop::Closedir,
            FopArgs::Fsyncdir { .. } => Fop::Fsyncdir,
            FopArgs::Access { .. } => Fop::Access,
            FopArgs::Create { .. } => Fop::Create,
            FopArgs::Ftruncate { .. } => Fop::Ftruncate,
            FopArgs::Fstat { .. } => Fop::Fstat,
            FopArgs::Lk { .. } => Fop::Lk,
            FopArgs::Utimens { .. } => Fop::Utimens,
            FopArgs::Fchmod { .. } => Fop::Fchmod,
            FopArgs::Fchown { .. } => Fop::Fchown,
            FopArgs::Lookup { .. } => Fop::Lookup,
        }
    }

    /// The open file the operation targets, if any.
    pub fn fd(&self) -> Option<&Arc<Fd>> {
        match self {
            FopArgs::Read { fd, .. }
            | FopArgs::Write { fd, .. }
            | FopArgs::Flush { fd }
            | FopArgs::Close { fd }
            | FopArgs::Fsync { fd, .. }
            | FopArgs::Readdir { fd, .. }
            | FopArgs::Closedir { fd }
            | FopArgs::Fsyncdir { fd, .. }
            | FopArgs::Ftruncate { fd, .. }
            | FopArgs::Fstat { fd }
            | FopArgs::Lk { fd, .. }
            | FopArgs::Fchmod { fd, .. }
            | FopArgs::Fchown { fd, .. } => Some(fd),
            _ => None,
        }
    }
}

/// Operation-specific result payload.
#[derive(Debug, Clone, Default)]
pub enum FopOutput {
    /// Nothing beyond `(op_ret, op_errno)`.
    #[default]
    None,
    Stat(Stat),
    Readlink(String),
    /// OPEN, OPENDIR and CREATE hand back the opened file.
    Fd { fd: Arc<Fd>, stat: Option<Stat> },
    Read { data: Bytes, stat: Stat },
    Statfs(Statfs),
    Xattrs(Dict),
    Entries(Vec<DirEntry>),
    Lock(Flock),
}

/// Result of one operation as it travels back up through UNWIND.
#[derive(Debug, Clone)]
pub struct FopReply {
    /// Return value, negative on failure.
    pub op_ret: i32,
    /// POSIX errno, meaningful when `op_ret < 0`.
    pub op_errno: i32,
    /// Result payload.
    pub output: FopOutput,
}

impl FopReply {
    /// Successful reply.
    pub fn ok(op_ret: i32, output: FopOutput) -> Self {
        Self {
            op_ret,
            op_errno: 0,
            output,
        }
    }

    /// Successful reply carrying nothing but `op_ret = 0`.
    pub fn done() -> Self {
        Self::ok(0, FopOutput::None)
    }

    /// Failed reply: `op_ret = -1`.
    pub fn error(op_errno: i32) -> Self {
        Self {
            op_ret: -1,
            op_errno,
            output: FopOutput::None,
        }
    }

    /// Check if this reply reports a failure.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.op_ret < 0
    }
}
