//! TideHouse Core Types
//!
//! This crate defines the value types shared by every TideHouse component:
//!
//! 1. **Records**: `PrepareRecord` / `CommitRecord` - the two record kinds the
//!    read path consumes from the transaction log, plus `EventRecord`, the
//!    assembled unit handed back to callers.
//! 2. **Stream metadata**: retention and access-control settings stored as
//!    JSON events on a stream's metastream (`$maxCount`, `$maxAge`, `$tb`,
//!    `$cacheControl`, `$acl`).
//! 3. **Naming conventions**: system streams (`$...`) and metastreams
//!    (`$$...`), with bit-exact translation helpers.
//! 4. **Hashing**: two independent 32-bit hash functions combined into the
//!    64-bit stream hash that keys the secondary index.
//! 5. **Event-number sentinels**: `NO_STREAM`, `DELETED_STREAM`, `INVALID`.
//!
//! ## Design Decisions
//!
//! - Payloads are `bytes::Bytes` for zero-copy slicing.
//! - Records are plain data, immutable once read from the log.
//! - The stream-id type is abstract: streams are identified by `String` in
//!   the string log format and by `u32` in the numeric log format. The
//!   `StreamId` trait captures the minimal capability set both share.
//! - Hash functions are seeded with fixed constants so that the hash of a
//!   given stream name is stable across process restarts.

pub mod event_number;
pub mod hashing;
pub mod metadata;
pub mod record;
pub mod streams;
pub mod time;

pub use event_number::{DELETED_STREAM, INVALID, NO_STREAM};
pub use hashing::{combine_hashes, IdentityHighHasher, IdentityLowHasher, Sip32Hasher, StreamHasher, Xxh32Hasher};
pub use metadata::{EffectiveAcl, StreamAcl, StreamMetadata, SystemSettings};
pub use record::{CommitRecord, EventRecord, LogRecordVersion, PrepareFlags, PrepareRecord};
pub use streams::StreamId;
pub use time::now_ms;
