//! Open file handles shared between the protocol layer and translators.

use std::collections::HashMap;
use std::sync::Mutex;

/// What an [`Fd`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    File,
    Dir,
}

/// An open file or directory.
///
/// Translators attach private state through [`set_ctx`](Self::set_ctx),
/// keyed by their own name.
#[derive(Debug)]
pub struct Fd {
    path: String,
    flags: i32,
    kind: FdKind,
    ctx: Mutex<HashMap<String, u64>>,
}

impl Fd {
    /// Handle for an opened regular file.
    pub fn file(path: impl Into<String>, flags: i32) -> Self {
        Self::new(path.into(), flags, FdKind::File)
    }

    /// Handle for an opened directory.
    pub fn dir(path: impl Into<String>) -> Self {
        Self::new(path.into(), 0, FdKind::Dir)
    }

    fn new(path: String, flags: i32, kind: FdKind) -> Self {
        Self {
            path,
            flags,
            kind,
            ctx: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn flags(&self) -> i32 {
        self.flags
    }

    #[inline]
    pub fn kind(&self) -> FdKind {
        self.kind
    }

    /// Store a translator's value, returning the previous one.
    pub fn set_ctx(&self, xlator: &str, value: u64) -> Option<u64> {
        self.ctx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(xlator.to_owned(), value)
    }

    /// Fetch a translator's value.
    pub fn ctx(&self, xlator: &str) -> Option<u64> {
        self.ctx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(xlator)
            .copied()
    }

    /// Remove a translator's value.
    pub fn del_ctx(&self, xlator: &str) -> Option<u64> {
        self.ctx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(xlator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctx_per_xlator() {
        let fd = Fd::file("/a", libc::O_RDWR);
        assert_eq!(fd.set_ctx("posix", 3), None);
        assert_eq!(fd.set_ctx("posix", 4), Some(3));
        fd.set_ctx("locks", 9);

        assert_eq!(fd.ctx("posix"), Some(4));
        assert_eq!(fd.del_ctx("locks"), Some(9));
        assert_eq!(fd.ctx("locks"), None);
        assert_eq!(fd.kind(), FdKind::File);
        assert_eq!(fd.flags(), libc::O_RDWR);
    }

    #[test]
    fn test_dir_handle() {
        let fd = Fd::dir("/d");
        assert_eq!(fd.kind(), FdKind::Dir);
        assert_eq!(fd.path(), "/d");
    }
}
