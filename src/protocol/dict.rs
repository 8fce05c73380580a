//! Self-describing key/value payload carried inside a block.
//!
//! Wire layout (all integers Big Endian):
//! ```text
//! count: u32
//! repeated count times:
//!   tag: u8 | key_len: u32 | value_len: u32 | key bytes | NUL | value bytes
//! ```
//!
//! `key_len` excludes the NUL. Integers travel as 8-byte values, strings as
//! UTF-8 without terminator.
//!
//! # Example
//!
//! ```
//! use glusterfs_core::protocol::Dict;
//!
//! let mut dict = Dict::new();
//! dict.set("PATH", "/etc/hosts");
//! dict.set("FLAGS", 0i64);
//!
//! let wire = dict.serialize();
//! let back = Dict::unserialize(&wire).unwrap();
//! assert_eq!(back.require_str("PATH").unwrap(), "/etc/hosts");
//! ```

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{GlusterError, Result};

/// Size of the leading entry count.
pub const DICT_HDR_LEN: usize = 4;

/// Size of the fixed per-entry header (tag + key length + value length).
pub const DICT_ENTRY_HDR_LEN: usize = 1 + 4 + 4;

/// Largest key or value accepted on the wire (1 MiB).
pub const DICT_KEY_VALUE_MAX_SIZE: usize = 1024 * 1024;

const TAG_INT: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_BYTES: u8 = 3;

/// A tagged dictionary value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Signed 64-bit integer.
    Int(i64),
    /// UTF-8 string.
    Str(String),
    /// Opaque bytes.
    Bytes(Bytes),
}

impl Value {
    /// Name of the variant, used in type mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Value::Int(_) => TAG_INT,
            Value::Str(_) => TAG_STR,
            Value::Bytes(_) => TAG_BYTES,
        }
    }

    fn wire_len(&self) -> usize {
        match self {
            Value::Int(_) => 8,
            Value::Str(s) => s.len(),
            Value::Bytes(b) => b.len(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

/// Ordered key/value dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dict {
    entries: BTreeMap<String, Value>,
}

impl Dict {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Remove a key, returning its value.
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Check whether a key is present.
    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the dictionary is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Release the dictionary.
    pub fn destroy(self) {}

    /// Required integer field.
    pub fn require_int(&self, key: &str) -> Result<i64> {
        match self.require(key)? {
            Value::Int(v) => Ok(*v),
            other => Err(mismatch(key, "int", other)),
        }
    }

    /// Required string field.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            Value::Str(v) => Ok(v),
            other => Err(mismatch(key, "str", other)),
        }
    }

    /// Required bytes field.
    pub fn require_bytes(&self, key: &str) -> Result<&Bytes> {
        match self.require(key)? {
            Value::Bytes(v) => Ok(v),
            other => Err(mismatch(key, "bytes", other)),
        }
    }

    /// Optional integer field; present with the wrong type is still an error.
    pub fn optional_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(mismatch(key, "int", other)),
        }
    }

    /// Optional string field.
    pub fn optional_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(key, "str", other)),
        }
    }

    /// Optional bytes field.
    pub fn optional_bytes(&self, key: &str) -> Result<Option<&Bytes>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bytes(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(key, "bytes", other)),
        }
    }

    fn require(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| GlusterError::MissingKey(key.to_owned()))
    }

    /// Exact length of [`serialize`](Self::serialize)'s output.
    pub fn serialized_length(&self) -> usize {
        DICT_HDR_LEN
            + self
                .entries
                .iter()
                .map(|(k, v)| DICT_ENTRY_HDR_LEN + k.len() + 1 + v.wire_len())
                .sum::<usize>()
    }

    /// Check that every key and value fits [`DICT_KEY_VALUE_MAX_SIZE`].
    ///
    /// [`serialize`](Self::serialize) does not check; a dict that fails
    /// here would be refused by [`unserialize`](Self::unserialize).
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.entries {
            if key.len() > DICT_KEY_VALUE_MAX_SIZE || value.wire_len() > DICT_KEY_VALUE_MAX_SIZE {
                return Err(GlusterError::Decode(format!(
                    "Dict entry {key} too large: value {}",
                    value.wire_len()
                )));
            }
        }
        Ok(())
    }

    /// Serialize to wire bytes.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_length());
        buf.put_u32(self.entries.len() as u32);

        for (key, value) in &self.entries {
            buf.put_u8(value.tag());
            buf.put_u32(key.len() as u32);
            buf.put_u32(value.wire_len() as u32);
            buf.put_slice(key.as_bytes());
            buf.put_u8(0);
            match value {
                Value::Int(v) => buf.put_i64(*v),
                Value::Str(s) => buf.put_slice(s.as_bytes()),
                Value::Bytes(b) => buf.put_slice(b),
            }
        }

        buf.freeze()
    }

    /// Parse wire bytes. The whole buffer must be consumed.
    pub fn unserialize(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { buf, pos: 0 };

        let count = cursor.u32()? as usize;
        let max_entries = buf.len().saturating_sub(DICT_HDR_LEN) / (DICT_ENTRY_HDR_LEN + 1);
        if count > max_entries {
            return Err(GlusterError::Decode(format!(
                "Dict count {count} too large for {} bytes",
                buf.len()
            )));
        }

        let mut dict = Dict::new();
        for _ in 0..count {
            let tag = cursor.u8()?;
            let key_len = cursor.u32()? as usize;
            let value_len = cursor.u32()? as usize;
            if key_len > DICT_KEY_VALUE_MAX_SIZE || value_len > DICT_KEY_VALUE_MAX_SIZE {
                return Err(GlusterError::Decode(format!(
                    "Dict entry too large: key {key_len}, value {value_len}"
                )));
            }

            let key = std::str::from_utf8(cursor.take(key_len)?)
                .map_err(|_| GlusterError::Decode("Dict key is not UTF-8".to_string()))?
                .to_owned();
            if cursor.u8()? != 0 {
                return Err(GlusterError::Decode(format!(
                    "Dict key {key} not NUL terminated"
                )));
            }

            let raw = cursor.take(value_len)?;
            let value = match tag {
                TAG_INT => {
                    let arr: [u8; 8] = raw.try_into().map_err(|_| {
                        GlusterError::Decode(format!("Int {key} has length {value_len}"))
                    })?;
                    Value::Int(i64::from_be_bytes(arr))
                }
                TAG_STR => Value::Str(
                    std::str::from_utf8(raw)
                        .map_err(|_| GlusterError::Decode(format!("Str {key} is not UTF-8")))?
                        .to_owned(),
                ),
                TAG_BYTES => Value::Bytes(Bytes::copy_from_slice(raw)),
                other => {
                    return Err(GlusterError::Decode(format!(
                        "Unknown value tag {other} for {key}"
                    )))
                }
            };

            if dict.entries.insert(key, value).is_some() {
                return Err(GlusterError::Decode("Duplicate dict key".to_string()));
            }
        }

        if cursor.pos != buf.len() {
            return Err(GlusterError::Decode(format!(
                "{} trailing bytes after dict",
                buf.len() - cursor.pos
            )));
        }

        Ok(dict)
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> GlusterError {
    GlusterError::TypeMismatch {
        key: key.to_owned(),
        expected,
        found: found.type_name(),
    }
}

/// Bounds-checked reader over the input slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                GlusterError::Decode(format!(
                    "Dict truncated: need {n} bytes at offset {}",
                    self.pos
                ))
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
