//! Log Record Types
//!
//! The transaction log is an append-only sequence of records. The read path
//! only ever sees two kinds:
//!
//! - **Prepare**: carries an event's payload - stream id, event number,
//!   type, data, metadata, timestamp and flags. Written first.
//! - **Commit**: anchors a transaction's prepares at their final event
//!   numbers. Single-event writes carry the `IS_COMMITTED` flag on the
//!   prepare itself and need no separate commit record.
//!
//! `EventRecord` is the assembled unit handed back to callers: the event
//! number resolved through the index plus the prepare's payload.
//!
//! ## Design Decisions
//!
//! - Records are generic over the stream-id type so both log formats share
//!   one definition without dynamic dispatch.
//! - `data`/`metadata` are `bytes::Bytes`: cloning a record never copies
//!   payload bytes.
//! - Flags are a `u16` bitset matching the on-disk encoding, not a struct of
//!   bools, so unknown bits survive a rewrite round-trip.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::streams::StreamId;

/// On-disk record layout version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordVersion {
    /// Legacy layout. Metadata written in this version encodes soft-delete
    /// as `$tb == i32::MAX`.
    V0,
    /// Current layout.
    V1,
}

/// Bitset of prepare-record flags, stored as written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrepareFlags(pub u16);

impl PrepareFlags {
    pub const NONE: PrepareFlags = PrepareFlags(0);
    /// The prepare carries event data.
    pub const DATA: PrepareFlags = PrepareFlags(0x01);
    /// First prepare of a transaction.
    pub const TRANSACTION_BEGIN: PrepareFlags = PrepareFlags(0x04);
    /// Last prepare of a transaction.
    pub const TRANSACTION_END: PrepareFlags = PrepareFlags(0x08);
    /// The prepare is a stream tombstone.
    pub const STREAM_DELETE: PrepareFlags = PrepareFlags(0x10);
    /// The prepare is committed implicitly, without a commit record.
    pub const IS_COMMITTED: PrepareFlags = PrepareFlags(0x20);
    /// The event data is JSON.
    pub const IS_JSON: PrepareFlags = PrepareFlags(0x100);

    pub fn contains(self, other: PrepareFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PrepareFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for PrepareFlags {
    type Output = PrepareFlags;

    fn bitor(self, rhs: PrepareFlags) -> PrepareFlags {
        PrepareFlags(self.0 | rhs.0)
    }
}

/// A prepare record as read from the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRecord<Id: StreamId> {
    /// Position of this record in the log.
    pub log_position: i64,

    /// Position of the transaction this prepare belongs to. Equals
    /// `log_position` for the first prepare of a transaction and for
    /// single-event writes.
    pub transaction_position: i64,

    /// Stream the event was written to.
    pub event_stream_id: Id,

    /// Event number assigned at write time, or the tombstone marker.
    pub event_number: i64,

    /// Application-assigned event type.
    pub event_type: String,

    /// Write timestamp in milliseconds since the Unix epoch.
    pub timestamp: i64,

    pub flags: PrepareFlags,

    /// Event payload.
    pub data: Bytes,

    /// Event metadata payload.
    pub metadata: Bytes,

    /// Layout version the record was written with.
    pub record_version: LogRecordVersion,
}

impl<Id: StreamId> PrepareRecord<Id> {
    pub fn is_committed(&self) -> bool {
        self.flags.contains(PrepareFlags::IS_COMMITTED)
    }

    pub fn is_json(&self) -> bool {
        self.flags.contains(PrepareFlags::IS_JSON)
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags.contains(PrepareFlags::STREAM_DELETE)
    }
}

/// A commit record as read from the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Position of this record in the log.
    pub log_position: i64,

    /// Position of the transaction being committed.
    pub transaction_position: i64,

    /// Event number assigned to the transaction's first prepare.
    pub first_event_number: i64,

    /// Commit timestamp in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// An event as returned to callers: the index-resolved event number plus the
/// payload of the prepare backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord<Id: StreamId> {
    pub event_number: i64,
    pub log_position: i64,
    pub event_stream_id: Id,
    pub event_type: String,
    pub timestamp: i64,
    pub flags: PrepareFlags,
    pub data: Bytes,
    pub metadata: Bytes,
}

impl<Id: StreamId> EventRecord<Id> {
    /// Assemble an event record from an index entry's version and the
    /// prepare found at its position.
    pub fn from_prepare(event_number: i64, prepare: PrepareRecord<Id>) -> Self {
        Self {
            event_number,
            log_position: prepare.log_position,
            event_stream_id: prepare.event_stream_id,
            event_type: prepare.event_type,
            timestamp: prepare.timestamp,
            flags: prepare.flags,
            data: prepare.data,
            metadata: prepare.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepare(stream: &str, number: i64) -> PrepareRecord<String> {
        PrepareRecord {
            log_position: 100,
            transaction_position: 100,
            event_stream_id: stream.to_string(),
            event_number: number,
            event_type: "created".to_string(),
            timestamp: 1_700_000_000_000,
            flags: PrepareFlags::DATA | PrepareFlags::IS_COMMITTED,
            data: Bytes::from_static(b"payload"),
            metadata: Bytes::new(),
            record_version: LogRecordVersion::V1,
        }
    }

    // ---------------------------------------------------------------
    // PrepareFlags
    // ---------------------------------------------------------------

    #[test]
    fn test_flags_contains() {
        let flags = PrepareFlags::DATA | PrepareFlags::IS_JSON;
        assert!(flags.contains(PrepareFlags::DATA));
        assert!(flags.contains(PrepareFlags::IS_JSON));
        assert!(!flags.contains(PrepareFlags::STREAM_DELETE));
    }

    #[test]
    fn test_flags_contains_compound() {
        let flags = PrepareFlags::DATA | PrepareFlags::IS_JSON;
        assert!(flags.contains(PrepareFlags::DATA | PrepareFlags::IS_JSON));
        assert!(!flags.contains(PrepareFlags::DATA | PrepareFlags::IS_COMMITTED));
    }

    #[test]
    fn test_flags_insert() {
        let mut flags = PrepareFlags::NONE;
        flags.insert(PrepareFlags::IS_COMMITTED);
        assert!(flags.contains(PrepareFlags::IS_COMMITTED));
    }

    #[test]
    fn test_flags_preserve_unknown_bits() {
        let raw = PrepareFlags(0x8000 | PrepareFlags::DATA.0);
        assert!(raw.contains(PrepareFlags::DATA));
        assert_eq!(raw.0 & 0x8000, 0x8000);
    }

    #[test]
    fn test_none_contains_none() {
        assert!(PrepareFlags::NONE.contains(PrepareFlags::NONE));
        assert!(PrepareFlags::DATA.contains(PrepareFlags::NONE));
    }

    // ---------------------------------------------------------------
    // PrepareRecord helpers
    // ---------------------------------------------------------------

    #[test]
    fn test_is_committed() {
        assert!(prepare("orders", 0).is_committed());
    }

    #[test]
    fn test_is_json() {
        let mut p = prepare("orders", 0);
        assert!(!p.is_json());
        p.flags.insert(PrepareFlags::IS_JSON);
        assert!(p.is_json());
    }

    #[test]
    fn test_is_tombstone() {
        let mut p = prepare("orders", i64::MAX);
        assert!(!p.is_tombstone());
        p.flags.insert(PrepareFlags::STREAM_DELETE);
        assert!(p.is_tombstone());
    }

    // ---------------------------------------------------------------
    // EventRecord assembly
    // ---------------------------------------------------------------

    #[test]
    fn test_from_prepare_copies_payload() {
        let p = prepare("orders", 3);
        let record = EventRecord::from_prepare(3, p.clone());
        assert_eq!(record.event_number, 3);
        assert_eq!(record.log_position, p.log_position);
        assert_eq!(record.event_stream_id, "orders");
        assert_eq!(record.event_type, "created");
        assert_eq!(record.data, Bytes::from_static(b"payload"));
        assert_eq!(record.timestamp, p.timestamp);
    }

    #[test]
    fn test_from_prepare_uses_index_event_number() {
        // Transactions: the index version wins over the prepare's own number.
        let p = prepare("orders", 0);
        let record = EventRecord::from_prepare(7, p);
        assert_eq!(record.event_number, 7);
    }

    #[test]
    fn test_clone_shares_payload_bytes() {
        let p = prepare("orders", 0);
        let cloned = p.clone();
        // Bytes clones are reference-counted views over the same buffer.
        assert_eq!(p.data.as_ptr(), cloned.data.as_ptr());
    }
}
