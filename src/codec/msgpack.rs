//! MsgPack codec using `rmp-serde`.
//!
//! Structured fop results (stat, statfs, directory entries, locks) travel
//! as MsgPack inside dictionary byte values. Structs are always encoded as
//! maps so fields can be added without breaking older peers.
//!
//! # Example
//!
//! ```
//! use glusterfs_core::codec::MsgPackCodec;
//! use glusterfs_core::xlator::Stat;
//!
//! let stat = Stat { ino: 42, size: 4096, ..Stat::default() };
//! let encoded = MsgPackCodec::encode_bytes(&stat).unwrap();
//! let decoded: Stat = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, stat);
//! ```

use bytes::Bytes;

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode a value straight into a dictionary-ready `Bytes`.
    #[inline]
    pub fn encode_bytes<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        Self::encode(value).map(Bytes::from)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GlusterError;
    use crate::xlator::{DirEntry, Flock, Stat, Statfs, Timespec};

    #[test]
    fn test_stat_round_trip() {
        let stat = Stat {
            ino: 7,
            mode: libc::S_IFREG as u32 | 0o644,
            size: 12,
            mtime: Timespec { sec: 1, nsec: 2 },
            ..Stat::default()
        };
        let decoded: Stat = MsgPackCodec::decode(&MsgPackCodec::encode(&stat).unwrap()).unwrap();
        assert_eq!(decoded, stat);
    }

    #[test]
    fn test_entries_round_trip() {
        let entries = vec![
            DirEntry {
                name: ".".into(),
                offset: 1,
                stat: Stat::default(),
            },
            DirEntry {
                name: "file".into(),
                offset: 2,
                stat: Stat {
                    ino: 3,
                    ..Stat::default()
                },
            },
        ];
        let bytes = MsgPackCodec::encode_bytes(&entries).unwrap();
        let decoded: Vec<DirEntry> = MsgPackCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_structs_encode_as_maps() {
        let lock = Flock {
            lock_type: libc::F_WRLCK as i16,
            ..Flock::default()
        };
        let bytes = MsgPackCodec::encode(&lock).unwrap();
        // fixmap marker with 5 entries
        assert_eq!(bytes[0], 0x85);
    }

    #[test]
    fn test_decode_garbage() {
        let result: Result<Statfs> = MsgPackCodec::decode(&[0xc1]);
        assert!(matches!(result, Err(GlusterError::MsgPackDecode(_))));
    }
}
