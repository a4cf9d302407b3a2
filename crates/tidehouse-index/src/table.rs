//! Table Index Abstraction
//!
//! The table index is the sorted collection of `IndexEntry` rows the read
//! path resolves streams through. Production deployments back it with a
//! memtable plus sorted on-disk tables; this crate consumes it through the
//! `TableIndex` trait and ships an in-memory implementation for the
//! in-memory mode and tests.
//!
//! ## Ordering Contract
//!
//! Range queries return entries in **descending version order**. When the
//! same `(hash, version)` pair appears more than once (index rebuilds,
//! scavenge rewrites), the **most recently added entry comes first**. The
//! reader's duplicate handling relies on both properties: scanning a range
//! front-to-back visits newest data first, and keeping the first entry per
//! version keeps the last-written one.
//!
//! ## Checkpoints
//!
//! `prepare_checkpoint` / `commit_checkpoint` report the log positions the
//! index has durably absorbed. The existence-filter initializer uses them to
//! decide where index-driven seeding ends and log tailing begins.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::entry::IndexEntry;

/// Sorted (stream hash, version) -> position index, as consumed by the read
/// path. Reader methods are thread-safe.
#[async_trait]
pub trait TableIndex: Send + Sync {
    /// Entries for `stream_hash` with version in `[low, high]`, descending
    /// by version, newest-first among duplicates, at most `limit` if given.
    async fn get_range(
        &self,
        stream_hash: u64,
        low: i64,
        high: i64,
        limit: Option<usize>,
    ) -> Vec<IndexEntry>;

    /// Position of the newest entry at exactly `version`, if any.
    async fn try_get_one_value(&self, stream_hash: u64, version: i64) -> Option<i64>;

    /// The highest-version entry for `stream_hash`.
    async fn try_get_latest_entry(&self, stream_hash: u64) -> Option<IndexEntry>;

    /// The lowest-version entry for `stream_hash`.
    async fn try_get_oldest_entry(&self, stream_hash: u64) -> Option<IndexEntry>;

    /// Every entry in the index, ascending by (hash, version). Used by the
    /// existence-filter initializer.
    async fn iterate_all(&self) -> Vec<IndexEntry>;

    /// Log position up to which prepares are indexed.
    fn prepare_checkpoint(&self) -> i64;

    /// Log position up to which commits are indexed.
    fn commit_checkpoint(&self) -> i64;
}

/// In-memory table index. Backs the in-memory mode; the write side and test
/// fixtures populate it through `add`.
pub struct InMemoryTableIndex {
    // (hash, version) -> positions, oldest first. Reads walk positions in
    // reverse so the newest duplicate surfaces first.
    entries: RwLock<BTreeMap<(u64, i64), Vec<i64>>>,
    prepare_checkpoint: AtomicI64,
    commit_checkpoint: AtomicI64,
}

impl Default for InMemoryTableIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTableIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            prepare_checkpoint: AtomicI64::new(-1),
            commit_checkpoint: AtomicI64::new(-1),
        }
    }

    /// Add an entry. Duplicate (hash, version) pairs accumulate; the newest
    /// addition wins on reads.
    pub fn add(&self, stream_hash: u64, version: i64, position: i64) {
        let mut entries = self.entries.write().unwrap();
        entries
            .entry((stream_hash, version))
            .or_default()
            .push(position);
    }

    /// Remove the entry at (hash, version, position), as a scavenge of the
    /// index would.
    pub fn remove(&self, stream_hash: u64, version: i64, position: i64) -> bool {
        let mut entries = self.entries.write().unwrap();
        let Some(positions) = entries.get_mut(&(stream_hash, version)) else {
            return false;
        };
        let Some(at) = positions.iter().position(|&p| p == position) else {
            return false;
        };
        positions.remove(at);
        if positions.is_empty() {
            entries.remove(&(stream_hash, version));
        }
        true
    }

    pub fn set_checkpoints(&self, prepare: i64, commit: i64) {
        self.prepare_checkpoint.store(prepare, Ordering::SeqCst);
        self.commit_checkpoint.store(commit, Ordering::SeqCst);
    }
}

#[async_trait]
impl TableIndex for InMemoryTableIndex {
    async fn get_range(
        &self,
        stream_hash: u64,
        low: i64,
        high: i64,
        limit: Option<usize>,
    ) -> Vec<IndexEntry> {
        if low > high {
            return Vec::new();
        }
        let limit = limit.unwrap_or(usize::MAX);
        let entries = self.entries.read().unwrap();
        let mut out = Vec::new();
        for (&(hash, version), positions) in entries
            .range((stream_hash, low)..=(stream_hash, high))
            .rev()
        {
            for &position in positions.iter().rev() {
                if out.len() >= limit {
                    return out;
                }
                out.push(IndexEntry::new(hash, version, position));
            }
        }
        out
    }

    async fn try_get_one_value(&self, stream_hash: u64, version: i64) -> Option<i64> {
        let entries = self.entries.read().unwrap();
        entries
            .get(&(stream_hash, version))
            .and_then(|positions| positions.last().copied())
    }

    async fn try_get_latest_entry(&self, stream_hash: u64) -> Option<IndexEntry> {
        let entries = self.entries.read().unwrap();
        entries
            .range((stream_hash, i64::MIN)..=(stream_hash, i64::MAX))
            .next_back()
            .map(|(&(hash, version), positions)| {
                IndexEntry::new(hash, version, *positions.last().expect("no empty position lists"))
            })
    }

    async fn try_get_oldest_entry(&self, stream_hash: u64) -> Option<IndexEntry> {
        let entries = self.entries.read().unwrap();
        entries
            .range((stream_hash, i64::MIN)..=(stream_hash, i64::MAX))
            .next()
            .map(|(&(hash, version), positions)| {
                IndexEntry::new(hash, version, *positions.first().expect("no empty position lists"))
            })
    }

    async fn iterate_all(&self) -> Vec<IndexEntry> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .flat_map(|(&(hash, version), positions)| {
                positions
                    .iter()
                    .map(move |&position| IndexEntry::new(hash, version, position))
            })
            .collect()
    }

    fn prepare_checkpoint(&self) -> i64 {
        self.prepare_checkpoint.load(Ordering::SeqCst)
    }

    fn commit_checkpoint(&self) -> i64 {
        self.commit_checkpoint.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: u64 = 0xfeed;

    #[tokio::test]
    async fn test_get_range_descending() {
        let index = InMemoryTableIndex::new();
        for v in 0..5 {
            index.add(HASH, v, 100 + v);
        }

        let entries = index.get_range(HASH, 1, 3, None).await;
        let versions: Vec<i64> = entries.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_get_range_bounds_inclusive() {
        let index = InMemoryTableIndex::new();
        index.add(HASH, 0, 100);
        index.add(HASH, 9, 109);

        let entries = index.get_range(HASH, 0, 9, None).await;
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_get_range_empty_when_inverted() {
        let index = InMemoryTableIndex::new();
        index.add(HASH, 3, 103);
        assert!(index.get_range(HASH, 5, 2, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_get_range_limit() {
        let index = InMemoryTableIndex::new();
        for v in 0..10 {
            index.add(HASH, v, 100 + v);
        }

        let entries = index.get_range(HASH, 0, i64::MAX, Some(3)).await;
        assert_eq!(entries.len(), 3);
        // Descending: the newest three.
        assert_eq!(entries[0].version, 9);
        assert_eq!(entries[2].version, 7);
    }

    #[tokio::test]
    async fn test_duplicates_newest_first() {
        let index = InMemoryTableIndex::new();
        index.add(HASH, 4, 100);
        index.add(HASH, 4, 200); // rewrite of the same version

        let entries = index.get_range(HASH, 4, 4, None).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].position, 200);
        assert_eq!(entries[1].position, 100);
        assert_eq!(index.try_get_one_value(HASH, 4).await, Some(200));
    }

    #[tokio::test]
    async fn test_hash_isolation() {
        let index = InMemoryTableIndex::new();
        index.add(1, 0, 100);
        index.add(2, 0, 200);

        let entries = index.get_range(1, 0, i64::MAX, None).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].position, 100);
    }

    #[tokio::test]
    async fn test_latest_and_oldest() {
        let index = InMemoryTableIndex::new();
        assert!(index.try_get_latest_entry(HASH).await.is_none());
        assert!(index.try_get_oldest_entry(HASH).await.is_none());

        for v in 2..7 {
            index.add(HASH, v, 100 + v);
        }
        assert_eq!(index.try_get_latest_entry(HASH).await.unwrap().version, 6);
        assert_eq!(index.try_get_oldest_entry(HASH).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_tombstone_version_is_latest() {
        let index = InMemoryTableIndex::new();
        index.add(HASH, 0, 100);
        index.add(HASH, i64::MAX, 101);
        assert_eq!(
            index.try_get_latest_entry(HASH).await.unwrap().version,
            i64::MAX
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let index = InMemoryTableIndex::new();
        index.add(HASH, 0, 100);
        index.add(HASH, 0, 200);

        assert!(index.remove(HASH, 0, 100));
        assert!(!index.remove(HASH, 0, 100));
        let entries = index.get_range(HASH, 0, 0, None).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].position, 200);

        assert!(index.remove(HASH, 0, 200));
        assert!(index.try_get_latest_entry(HASH).await.is_none());
    }

    #[tokio::test]
    async fn test_iterate_all_ascending() {
        let index = InMemoryTableIndex::new();
        index.add(2, 0, 20);
        index.add(1, 1, 11);
        index.add(1, 0, 10);

        let all = index.iterate_all().await;
        let keys: Vec<(u64, i64)> = all.iter().map(|e| (e.stream_hash, e.version)).collect();
        assert_eq!(keys, vec![(1, 0), (1, 1), (2, 0)]);
    }

    #[tokio::test]
    async fn test_checkpoints() {
        let index = InMemoryTableIndex::new();
        assert_eq!(index.prepare_checkpoint(), -1);
        assert_eq!(index.commit_checkpoint(), -1);
        index.set_checkpoints(10, 8);
        assert_eq!(index.prepare_checkpoint(), 10);
        assert_eq!(index.commit_checkpoint(), 8);
    }
}
