//! Log-Format Abstraction
//!
//! The database ships two log formats that differ in how streams are
//! identified:
//!
//! - **String format**: stream ids are the stream names themselves. The
//!   index key is a real 64-bit hash of the name, so distinct streams can
//!   collide; the existence filter is keyed by that hash.
//! - **Numeric format**: stream ids are `u32` values handed out by the
//!   stream-name index. The id doubles as the index key (identity hash,
//!   collision-free), the metastream flag lives in the low bit, and the
//!   existence filter is keyed by stream name at the name-index layer.
//!
//! Everything the read path needs from a format is the capability set below.
//! The reader is generic over `LogFormat` so both formats compile to
//! straight-line code - there is no dynamic dispatch on the hot path.

use tidehouse_core::hashing::{
    combine_hashes, IdentityHighHasher, IdentityLowHasher, Sip32Hasher, StreamHasher, Xxh32Hasher,
};
use tidehouse_core::streams::{self, StreamId};

use crate::existence::FilterKey;

/// Capability set a log format provides to the read path.
pub trait LogFormat: Send + Sync + 'static {
    type StreamId: StreamId;

    /// 64-bit index key for a stream id.
    fn stream_hash(&self, id: &Self::StreamId) -> u64;

    /// Whether `id` is a usable stream id (callers reject invalid ids).
    fn is_valid(&self, id: &Self::StreamId) -> bool;

    fn is_system_stream(&self, id: &Self::StreamId) -> bool;

    fn is_metastream(&self, id: &Self::StreamId) -> bool;

    /// The metastream of an original stream.
    fn metastream_of(&self, id: &Self::StreamId) -> Self::StreamId;

    /// The original stream of a metastream.
    fn original_stream_of(&self, id: &Self::StreamId) -> Self::StreamId;

    /// Key for the stream-existence filter, if this format consults the
    /// filter on the read path. The numeric format returns `None`: its
    /// filter is keyed by name and sits in front of name->id resolution
    /// instead.
    fn filter_key(&self, id: &Self::StreamId) -> Option<FilterKey<'_>>;
}

/// String stream ids, hashed with two independent 32-bit functions.
pub struct StringFormat<H = Xxh32Hasher, L = Sip32Hasher> {
    high: H,
    low: L,
}

impl Default for StringFormat {
    fn default() -> Self {
        Self {
            high: Xxh32Hasher::default(),
            low: Sip32Hasher::default(),
        }
    }
}

impl<H: StreamHasher, L: StreamHasher> StringFormat<H, L> {
    /// Build with explicit hashers. The hashers decide the on-disk index
    /// keys, so they must stay fixed for the lifetime of an index directory.
    pub fn with_hashers(high: H, low: L) -> Self {
        Self { high, low }
    }
}

impl<H: StreamHasher, L: StreamHasher> LogFormat for StringFormat<H, L> {
    type StreamId = String;

    fn stream_hash(&self, id: &String) -> u64 {
        let bytes = id.as_bytes();
        combine_hashes(self.high.hash(bytes), self.low.hash(bytes))
    }

    fn is_valid(&self, id: &String) -> bool {
        !id.is_empty_id()
    }

    fn is_system_stream(&self, id: &String) -> bool {
        streams::is_system_stream(id)
    }

    fn is_metastream(&self, id: &String) -> bool {
        streams::is_metastream(id)
    }

    fn metastream_of(&self, id: &String) -> String {
        streams::metastream_of(id)
    }

    fn original_stream_of(&self, id: &String) -> String {
        streams::original_stream_of(id).to_string()
    }

    fn filter_key(&self, id: &String) -> Option<FilterKey<'_>> {
        Some(FilterKey::StreamHash(self.stream_hash(id)))
    }
}

/// Numeric stream ids. Ids are allocated even; a stream's metastream is
/// `id + 1`, so the metastream flag is the low bit.
pub struct NumericFormat {
    /// Ids below this are reserved for system streams.
    first_real_stream: u32,
    high: IdentityHighHasher,
    low: IdentityLowHasher,
}

impl Default for NumericFormat {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl NumericFormat {
    pub fn new(first_real_stream: u32) -> Self {
        Self {
            first_real_stream,
            high: IdentityHighHasher,
            low: IdentityLowHasher,
        }
    }
}

impl LogFormat for NumericFormat {
    type StreamId = u32;

    fn stream_hash(&self, id: &u32) -> u64 {
        let bytes = id.to_le_bytes();
        combine_hashes(self.high.hash(&bytes), self.low.hash(&bytes))
    }

    fn is_valid(&self, id: &u32) -> bool {
        !id.is_empty_id()
    }

    fn is_system_stream(&self, id: &u32) -> bool {
        *id < self.first_real_stream
    }

    fn is_metastream(&self, id: &u32) -> bool {
        id & 1 == 1
    }

    fn metastream_of(&self, id: &u32) -> u32 {
        debug_assert!(!self.is_metastream(id));
        id + 1
    }

    fn original_stream_of(&self, id: &u32) -> u32 {
        debug_assert!(self.is_metastream(id));
        id - 1
    }

    fn filter_key(&self, _id: &u32) -> Option<FilterKey<'_>> {
        None
    }
}
