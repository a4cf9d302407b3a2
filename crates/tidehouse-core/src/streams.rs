//! Stream naming conventions.
//!
//! Streams whose names start with `$` are system streams. Every stream `X`
//! has a companion metastream `$$X` that holds its metadata events. The
//! translation between the two is purely textual and must stay bit-exact:
//! the write path, the read path and external tooling all rely on it.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Prefix marking a system stream.
pub const SYSTEM_STREAM_PREFIX: &str = "$";

/// Prefix marking a metastream.
pub const METASTREAM_PREFIX: &str = "$$";

/// Returns true if `name` is a system stream (including metastreams).
pub fn is_system_stream(name: &str) -> bool {
    name.starts_with(SYSTEM_STREAM_PREFIX)
}

/// Returns true if `name` is a metastream.
pub fn is_metastream(name: &str) -> bool {
    name.starts_with(METASTREAM_PREFIX)
}

/// The metastream that holds metadata for `name`.
pub fn metastream_of(name: &str) -> String {
    format!("{METASTREAM_PREFIX}{name}")
}

/// The original stream a metastream belongs to.
///
/// Must only be called with a metastream name.
pub fn original_stream_of(metastream: &str) -> &str {
    debug_assert!(is_metastream(metastream));
    &metastream[METASTREAM_PREFIX.len()..]
}

/// Minimal capability set shared by the concrete stream-id types.
///
/// The string log format identifies streams by name (`String`); the numeric
/// log format identifies them by `u32` with names resolved through a
/// persistent name index. Everything downstream of id resolution is generic
/// over this trait so the hot path stays monomorphized.
pub trait StreamId:
    Clone + Eq + Hash + Debug + Display + Send + Sync + 'static
{
    /// The reserved "no stream" sentinel id for this format.
    fn is_empty_id(&self) -> bool;
}

impl StreamId for String {
    fn is_empty_id(&self) -> bool {
        self.is_empty()
    }
}

impl StreamId for u32 {
    fn is_empty_id(&self) -> bool {
        *self == 0
    }
}
