//! Codec module - encoding of structured values carried inside dictionaries.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde`
//!
//! # Design
//!
//! Codecs are implemented as marker structs with static methods rather than trait objects.

mod msgpack;

pub use msgpack::MsgPackCodec;
