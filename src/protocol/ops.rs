//! Op-code tables.
//!
//! A wire op-code is the index of the operation in its table. The fop
//! table order is fixed; new operations may only be appended.

use serde::Serialize;

macro_rules! op_table {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[repr(u16)]
        pub enum $name {
            $($variant = $code),+
        }

        impl $name {
            /// Every operation in wire order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Look up an op-code.
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Wire op-code.
            #[inline]
            pub fn code(self) -> u16 {
                self as u16
            }

            /// Upper-case name used in logs and dumps.
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

op_table! {
    /// Filesystem operations.
    Fop {
        Stat = 0 => "STAT",
        Readlink = 1 => "READLINK",
        Mknod = 2 => "MKNOD",
        Mkdir = 3 => "MKDIR",
        Unlink = 4 => "UNLINK",
        Rmdir = 5 => "RMDIR",
        Symlink = 6 => "SYMLINK",
        Rename = 7 => "RENAME",
        Link = 8 => "LINK",
        Chmod = 9 => "CHMOD",
        Chown = 10 => "CHOWN",
        Truncate = 11 => "TRUNCATE",
        Open = 12 => "OPEN",
        Read = 13 => "READ",
        Write = 14 => "WRITE",
        Statfs = 15 => "STATFS",
        Flush = 16 => "FLUSH",
        Close = 17 => "CLOSE",
        Fsync = 18 => "FSYNC",
        Setxattr = 19 => "SETXATTR",
        Getxattr = 20 => "GETXATTR",
        Removexattr = 21 => "REMOVEXATTR",
        Opendir = 22 => "OPENDIR",
        Readdir = 23 => "READDIR",
        Closedir = 24 => "CLOSEDIR",
        Fsyncdir = 25 => "FSYNCDIR",
        Access = 26 => "ACCESS",
        Create = 27 => "CREATE",
        Ftruncate = 28 => "FTRUNCATE",
        Fstat = 29 => "FSTAT",
        Lk = 30 => "LK",
        Utimens = 31 => "UTIMENS",
        Fchmod = 32 => "FCHMOD",
        Fchown = 33 => "FCHOWN",
        Lookup = 34 => "LOOKUP",
    }
}

op_table! {
    /// Management operations, answered by the protocol layer itself.
    MgmtOp {
        Setvolume = 0 => "SETVOLUME",
        Getvolume = 1 => "GETVOLUME",
        Stats = 2 => "STATS",
        Getspec = 3 => "GETSPEC",
    }
}

impl Fop {
    /// Operations that take a lock-owner token.
    pub fn is_locking(self) -> bool {
        matches!(self, Fop::Lk | Fop::Flush | Fop::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_indices() {
        for (i, fop) in Fop::ALL.iter().enumerate() {
            assert_eq!(fop.code() as usize, i);
            assert_eq!(Fop::from_code(i as u16), Some(*fop));
        }
        assert_eq!(Fop::ALL.len(), 35);
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(Fop::from_code(35), None);
        assert_eq!(MgmtOp::from_code(4), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(Fop::Open.code(), 12);
        assert_eq!(Fop::Read.to_string(), "READ");
        assert_eq!(MgmtOp::Getspec.name(), "GETSPEC");
    }
}
