//! Management ops answered by the server without winding.

use super::connection::Connection;
use super::table::{keys, status_dict};
use crate::protocol::{Dict, MgmtOp};

/// Answer a management request.
pub(crate) fn handle(conn: &Connection, op: MgmtOp, request: &Dict) -> Dict {
    match op {
        MgmtOp::Setvolume => setvolume(conn, request),
        MgmtOp::Getvolume => status_dict(-1, libc::ENOSYS),
        MgmtOp::Stats => stats(conn),
        MgmtOp::Getspec => getspec(conn),
    }
}

/// Handshake: bind the connection to the named subvolume.
fn setvolume(conn: &Connection, request: &Dict) -> Dict {
    let name = match request.require_str(keys::REMOTE_SUBVOLUME) {
        Ok(name) => name,
        Err(e) => {
            let mut reply = status_dict(-1, e.errno());
            reply.set(keys::ERROR, "No remote-subvolume option specified");
            return reply;
        }
    };

    match conn.bind(name) {
        Ok(()) => {
            tracing::debug!("connection bound to subvolume {}", name);
            let mut reply = status_dict(0, 0);
            reply.set(keys::ERROR, "Success");
            reply
        }
        Err(e) => {
            tracing::warn!("setvolume for {} rejected: {}", name, e);
            let mut reply = status_dict(-1, libc::ENOENT);
            reply.set(keys::ERROR, format!("remote-subvolume \"{name}\" is not found"));
            reply
        }
    }
}

fn stats(conn: &Connection) -> Dict {
    let pool = conn.pool();
    let mut reply = status_dict(0, 0);
    reply.set(keys::CALL_COUNT, pool.count() as i64);
    reply.set(keys::TOTAL_COUNT, pool.total_count() as i64);
    reply.set(keys::FRAMES, pool.frames_in_use() as i64);
    reply.set(keys::OPEN_FDS, conn.open_fds() as i64);
    reply
}

fn getspec(conn: &Connection) -> Dict {
    match conn.spec() {
        Some(spec) => {
            let mut reply = status_dict(spec.len() as i32, 0);
            reply.set(keys::SPEC_FILE_CONTENTS, spec);
            reply
        }
        None => status_dict(-1, libc::ENOENT),
    }
}
