//! Event-number sentinels.
//!
//! Last-event-number resolution uses three reserved values alongside real
//! event numbers (which are always `>= 0`):
//!
//! - `NO_STREAM`: the stream has never been written to.
//! - `DELETED_STREAM`: the stream has been deleted (tombstoned at
//!   `i64::MAX`, or soft-deleted by setting `$tb` to the deleted marker).
//! - `INVALID`: the hash-collision read limit was hit before the stream
//!   could be resolved; callers treat this as temporarily unresolvable.

/// The stream has no events and no tombstone.
pub const NO_STREAM: i64 = -1;

/// The stream is deleted. Doubles as the tombstone event number.
pub const DELETED_STREAM: i64 = i64::MAX;

/// Resolution gave up after exhausting the hash-collision read limit.
pub const INVALID: i64 = -2;
