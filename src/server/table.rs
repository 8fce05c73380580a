//! Op dispatch table.
//!
//! Maps `(op type, op-code)` to a handler. Fop handlers carry an unmarshal
//! function that extracts the operation's arguments from the request
//! dictionary; a missing or mistyped required key fails the request before
//! anything is wound. Management ops are answered by the server itself.
//!
//! # Example
//!
//! ```ignore
//! use glusterfs_core::server::DispatchTable;
//! use glusterfs_core::protocol::{OpType, Fop};
//!
//! let table = DispatchTable::standard();
//! let handler = table.lookup(OpType::FopRequest, Fop::Open.code())?;
//! ```

use std::collections::HashMap;

use bytes::Bytes;

use super::fd_table::FdTable;
use crate::codec::MsgPackCodec;
use crate::error::{GlusterError, Result};
use crate::protocol::{Dict, Fop, MgmtOp, OpType, DICT_KEY_VALUE_MAX_SIZE};
use crate::xlator::{Flock, FopArgs, FopOutput, FopReply, Timespec};

/// Dictionary keys used by requests and replies.
pub mod keys {
    pub const CALLER_UID: &str = "CALLER_UID";
    pub const CALLER_GID: &str = "CALLER_GID";
    pub const CALLER_PID: &str = "CALLER_PID";
    pub const CALLER_GROUPS: &str = "CALLER_GROUPS";
    pub const LK_OWNER: &str = "LK_OWNER";

    pub const PATH: &str = "PATH";
    pub const NEWPATH: &str = "NEWPATH";
    pub const LINK: &str = "LINK";
    pub const MODE: &str = "MODE";
    pub const DEV: &str = "DEV";
    pub const FLAGS: &str = "FLAGS";
    pub const UID: &str = "UID";
    pub const GID: &str = "GID";
    pub const OFFSET: &str = "OFFSET";
    pub const LEN: &str = "LEN";
    pub const BUF: &str = "BUF";
    pub const FD: &str = "FD";
    pub const NAME: &str = "NAME";
    pub const DICT: &str = "DICT";
    pub const CMD: &str = "CMD";
    pub const LOCK: &str = "LOCK";
    pub const ATIME_SEC: &str = "ATIME_SEC";
    pub const ATIME_NSEC: &str = "ATIME_NSEC";
    pub const MTIME_SEC: &str = "MTIME_SEC";
    pub const MTIME_NSEC: &str = "MTIME_NSEC";
    pub const NEED_XATTR: &str = "NEED_XATTR";

    pub const RET: &str = "RET";
    pub const ERRNO: &str = "ERRNO";
    pub const STAT: &str = "STAT";
    pub const STATFS: &str = "STATFS";
    pub const NR_ENTRIES: &str = "NR_ENTRIES";
    pub const DIR_ENTRIES: &str = "DIR_ENTRIES";
    pub const ERROR: &str = "ERROR";

    pub const REMOTE_SUBVOLUME: &str = "remote-subvolume";
    pub const SPEC_FILE_CONTENTS: &str = "spec-file-contents";
    pub const CALL_COUNT: &str = "CALL_COUNT";
    pub const TOTAL_COUNT: &str = "TOTAL_COUNT";
    pub const FRAMES: &str = "FRAMES";
    pub const OPEN_FDS: &str = "OPEN_FDS";
}

/// Extracts fop arguments from a request dictionary.
pub type Unmarshal = fn(&Dict, &FdTable) -> Result<FopArgs>;

/// Fop entry of the table.
#[derive(Clone, Copy)]
pub struct FopHandler {
    pub fop: Fop,
    pub unmarshal: Unmarshal,
}

/// What to do with a request.
#[derive(Clone, Copy)]
pub enum Handler {
    /// Wind into the bound subvolume.
    Fop(FopHandler),
    /// Answer locally.
    Mgmt(MgmtOp),
}

/// Op dispatch table.
pub struct DispatchTable {
    entries: HashMap<(OpType, u16), Handler>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Table with every fop and management op registered.
    pub fn standard() -> Self {
        let mut table = Self::new();
        for fop in Fop::ALL {
            table.register_fop(*fop, unmarshal_for(*fop));
        }
        for op in MgmtOp::ALL {
            table.register_mgmt(*op);
        }
        table
    }

    /// Register or replace a fop handler.
    pub fn register_fop(&mut self, fop: Fop, unmarshal: Unmarshal) {
        self.entries.insert(
            (OpType::FopRequest, fop.code()),
            Handler::Fop(FopHandler { fop, unmarshal }),
        );
    }

    /// Register a management op.
    pub fn register_mgmt(&mut self, op: MgmtOp) {
        self.entries
            .insert((OpType::MgmtRequest, op.code()), Handler::Mgmt(op));
    }

    /// Resolve a request.
    ///
    /// Returns `UnknownOp` for any op-code without an entry.
    pub fn lookup(&self, op_type: OpType, op: u16) -> Result<Handler> {
        self.entries
            .get(&(op_type, op))
            .copied()
            .ok_or(GlusterError::UnknownOp {
                op_type: op_type.as_u16(),
                op,
            })
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Reply dictionary carrying only `RET` and `ERRNO`.
pub fn status_dict(op_ret: i32, op_errno: i32) -> Dict {
    let mut dict = Dict::new();
    dict.set(keys::RET, op_ret);
    dict.set(keys::ERRNO, op_errno);
    dict
}

/// Build the reply dictionary for a completed fop.
///
/// Opened files are registered in `fds` and returned by number. Nothing is
/// registered when the reply cannot be sent: a value over
/// [`DICT_KEY_VALUE_MAX_SIZE`] or a full fd table fails the whole reply.
pub fn marshal_reply(reply: &FopReply, fds: &FdTable) -> Result<Dict> {
    let mut dict = status_dict(reply.op_ret, reply.op_errno);

    match &reply.output {
        FopOutput::None => {}
        FopOutput::Stat(stat) => {
            dict.set(keys::STAT, MsgPackCodec::encode_bytes(stat)?);
        }
        FopOutput::Readlink(target) => {
            dict.set(keys::LINK, target.as_str());
        }
        FopOutput::Fd { stat, .. } => {
            if let Some(stat) = stat {
                dict.set(keys::STAT, MsgPackCodec::encode_bytes(stat)?);
            }
        }
        FopOutput::Read { data, stat } => {
            dict.set(keys::BUF, data.clone());
            dict.set(keys::STAT, MsgPackCodec::encode_bytes(stat)?);
        }
        FopOutput::Statfs(statfs) => {
            dict.set(keys::STATFS, MsgPackCodec::encode_bytes(statfs)?);
        }
        FopOutput::Xattrs(xattrs) => {
            dict.set(keys::DICT, xattrs.serialize());
        }
        FopOutput::Entries(entries) => {
            dict.set(keys::NR_ENTRIES, entries.len() as i64);
            dict.set(keys::DIR_ENTRIES, MsgPackCodec::encode_bytes(entries)?);
        }
        FopOutput::Lock(lock) => {
            dict.set(keys::LOCK, MsgPackCodec::encode_bytes(lock)?);
        }
    }

    dict.validate()?;
    if let FopOutput::Fd { fd, .. } = &reply.output {
        let no = fds.insert(fd.clone()).map_err(|e| {
            tracing::warn!("no fd slot for {}: {}", fd.path(), e);
            e
        })?;
        dict.set(keys::FD, no);
    }

    Ok(dict)
}

fn unmarshal_for(fop: Fop) -> Unmarshal {
    match fop {
        Fop::Stat => |d, _| Ok(FopArgs::Stat { path: path(d)? }),
        Fop::Readlink => |d, _| {
            Ok(FopArgs::Readlink {
                path: path(d)?,
                size: length(d)?,
            })
        },
        Fop::Mknod => |d, _| {
            Ok(FopArgs::Mknod {
                path: path(d)?,
                mode: mode(d)?,
                dev: unsigned(d, keys::DEV)?,
            })
        },
        Fop::Mkdir => |d, _| {
            Ok(FopArgs::Mkdir {
                path: path(d)?,
                mode: mode(d)?,
            })
        },
        Fop::Unlink => |d, _| Ok(FopArgs::Unlink { path: path(d)? }),
        Fop::Rmdir => |d, _| Ok(FopArgs::Rmdir { path: path(d)? }),
        Fop::Symlink => |d, _| {
            Ok(FopArgs::Symlink {
                target: d.require_str(keys::LINK)?.to_owned(),
                path: path(d)?,
            })
        },
        Fop::Rename => |d, _| {
            Ok(FopArgs::Rename {
                oldpath: path(d)?,
                newpath: d.require_str(keys::NEWPATH)?.to_owned(),
            })
        },
        Fop::Link => |d, _| {
            Ok(FopArgs::Link {
                oldpath: path(d)?,
                newpath: d.require_str(keys::NEWPATH)?.to_owned(),
            })
        },
        Fop::Chmod => |d, _| {
            Ok(FopArgs::Chmod {
                path: path(d)?,
                mode: mode(d)?,
            })
        },
        Fop::Chown => |d, _| {
            Ok(FopArgs::Chown {
                path: path(d)?,
                uid: narrow(d, keys::UID)?,
                gid: narrow(d, keys::GID)?,
            })
        },
        Fop::Truncate => |d, _| {
            Ok(FopArgs::Truncate {
                path: path(d)?,
                offset: unsigned(d, keys::OFFSET)?,
            })
        },
        Fop::Open => |d, _| {
            Ok(FopArgs::Open {
                path: path(d)?,
                flags: flags(d)?,
                mode: optional_mode(d)?,
            })
        },
        Fop::Read => |d, fds| {
            Ok(FopArgs::Read {
                fd: fds.get(d.require_int(keys::FD)?)?,
                size: length(d)?,
                offset: unsigned(d, keys::OFFSET)?,
            })
        },
        Fop::Write => |d, fds| {
            Ok(FopArgs::Write {
                fd: fds.get(d.require_int(keys::FD)?)?,
                data: d.require_bytes(keys::BUF)?.clone(),
                offset: unsigned(d, keys::OFFSET)?,
            })
        },
        Fop::Statfs => |d, _| Ok(FopArgs::Statfs { path: path(d)? }),
        Fop::Flush => |d, fds| {
            Ok(FopArgs::Flush {
                fd: fds.get(d.require_int(keys::FD)?)?,
            })
        },
        Fop::Close => |d, fds| {
            Ok(FopArgs::Close {
                fd: fds.get(d.require_int(keys::FD)?)?,
            })
        },
        Fop::Fsync => |d, fds| {
            Ok(FopArgs::Fsync {
                fd: fds.get(d.require_int(keys::FD)?)?,
                datasync: d.optional_int(keys::FLAGS)?.unwrap_or(0) != 0,
            })
        },
        Fop::Setxattr => |d, _| {
            Ok(FopArgs::Setxattr {
                path: path(d)?,
                xattrs: Dict::unserialize(d.require_bytes(keys::DICT)?)?,
                flags: flags(d)?,
            })
        },
        Fop::Getxattr => |d, _| {
            Ok(FopArgs::Getxattr {
                path: path(d)?,
                name: d.optional_str(keys::NAME)?.map(str::to_owned),
            })
        },
        Fop::Removexattr => |d, _| {
            Ok(FopArgs::Removexattr {
                path: path(d)?,
                name: d.require_str(keys::NAME)?.to_owned(),
            })
        },
        Fop::Opendir => |d, _| Ok(FopArgs::Opendir { path: path(d)? }),
        Fop::Readdir => |d, fds| {
            Ok(FopArgs::Readdir {
                fd: fds.get(d.require_int(keys::FD)?)?,
                size: length(d)?,
                offset: unsigned(d, keys::OFFSET)?,
            })
        },
        Fop::Closedir => |d, fds| {
            Ok(FopArgs::Closedir {
                fd: fds.get(d.require_int(keys::FD)?)?,
            })
        },
        Fop::Fsyncdir => |d, fds| {
            Ok(FopArgs::Fsyncdir {
                fd: fds.get(d.require_int(keys::FD)?)?,
                datasync: d.optional_int(keys::FLAGS)?.unwrap_or(0) != 0,
            })
        },
        Fop::Access => |d, _| {
            Ok(FopArgs::Access {
                path: path(d)?,
                mask: mode(d)?,
            })
        },
        Fop::Create => |d, _| {
            Ok(FopArgs::Create {
                path: path(d)?,
                flags: flags(d)?,
                mode: mode(d)?,
            })
        },
        Fop::Ftruncate => |d, fds| {
            Ok(FopArgs::Ftruncate {
                fd: fds.get(d.require_int(keys::FD)?)?,
                offset: unsigned(d, keys::OFFSET)?,
            })
        },
        Fop::Fstat => |d, fds| {
            Ok(FopArgs::Fstat {
                fd: fds.get(d.require_int(keys::FD)?)?,
            })
        },
        Fop::Lk => |d, fds| {
            Ok(FopArgs::Lk {
                fd: fds.get(d.require_int(keys::FD)?)?,
                cmd: narrow(d, keys::CMD)?,
                lock: MsgPackCodec::decode::<Flock>(d.require_bytes(keys::LOCK)?)?,
            })
        },
        Fop::Utimens => |d, _| {
            Ok(FopArgs::Utimens {
                path: path(d)?,
                atime: Timespec {
                    sec: d.require_int(keys::ATIME_SEC)?,
                    nsec: d.require_int(keys::ATIME_NSEC)?,
                },
                mtime: Timespec {
                    sec: d.require_int(keys::MTIME_SEC)?,
                    nsec: d.require_int(keys::MTIME_NSEC)?,
                },
            })
        },
        Fop::Fchmod => |d, fds| {
            Ok(FopArgs::Fchmod {
                fd: fds.get(d.require_int(keys::FD)?)?,
                mode: mode(d)?,
            })
        },
        Fop::Fchown => |d, fds| {
            Ok(FopArgs::Fchown {
                fd: fds.get(d.require_int(keys::FD)?)?,
                uid: narrow(d, keys::UID)?,
                gid: narrow(d, keys::GID)?,
            })
        },
        Fop::Lookup => |d, _| {
            Ok(FopArgs::Lookup {
                path: path(d)?,
                need_xattr: d.optional_int(keys::NEED_XATTR)?.unwrap_or(0) != 0,
            })
        },
    }
}

fn path(d: &Dict) -> Result<String> {
    Ok(d.require_str(keys::PATH)?.to_owned())
}

fn mode(d: &Dict) -> Result<u32> {
    narrow(d, keys::MODE)
}

fn optional_mode(d: &Dict) -> Result<u32> {
    Ok(optional_narrow(d, keys::MODE)?.unwrap_or(0))
}

fn flags(d: &Dict) -> Result<i32> {
    narrow(d, keys::FLAGS)
}

/// Reply size asked for by the client; the reply must fit one dict value.
fn length(d: &Dict) -> Result<u64> {
    let len = unsigned(d, keys::LEN)?;
    if len > DICT_KEY_VALUE_MAX_SIZE as u64 {
        return Err(GlusterError::Decode(format!(
            "{} {len} exceeds {DICT_KEY_VALUE_MAX_SIZE}",
            keys::LEN
        )));
    }
    Ok(len)
}

fn unsigned(d: &Dict, key: &str) -> Result<u64> {
    convert(key, d.require_int(key)?)
}

/// Required integer that must fit the target type.
pub(crate) fn narrow<T: TryFrom<i64>>(d: &Dict, key: &str) -> Result<T> {
    convert(key, d.require_int(key)?)
}

/// Optional integer that must fit the target type when present.
pub(crate) fn optional_narrow<T: TryFrom<i64>>(d: &Dict, key: &str) -> Result<Option<T>> {
    d.optional_int(key)?
        .map(|value| convert(key, value))
        .transpose()
}

fn convert<T: TryFrom<i64>>(key: &str, value: i64) -> Result<T> {
    T::try_from(value)
        .map_err(|_| GlusterError::Decode(format!("{key} value {value} out of range")))
}

/// Bytes payload helper for callers building requests.
pub fn encode_groups(groups: &[u32]) -> Result<Bytes> {
    MsgPackCodec::encode_bytes(&groups)
}
