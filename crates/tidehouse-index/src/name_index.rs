//! Stream-Name Index (numeric log format)
//!
//! The numeric log format stores stream ids, not names, so it needs a
//! persistent name -> id mapping. This module provides it as a small
//! log-structured store plus two decorators, composed statically:
//!
//! ```text
//! MetastreamNameIndex          "$$orders" <-> original id + 1
//!   -> FilteredNameIndex       skip lookups the existence filter rules out
//!     -> StreamNameIndex       append-only names.idx + in-memory maps
//! ```
//!
//! ## Id Allocation
//!
//! Fresh ids follow the arithmetic sequence `first_value + k * interval`
//! (defaults 1024 and 2): allocated ids are even, and a stream's metastream
//! is `id + 1`, so the metastream flag is exactly the low bit. Once a
//! binding exists it is immutable; both directions always agree because they
//! are replayed from the same log.
//!
//! ## File Format
//!
//! `names.idx` is a sequence of entries:
//!
//! ```text
//! ┌─────────────┬──────────┬──────────┬────────────┐
//! │ Payload Len │ CRC32    │ StreamId │ Name       │
//! │ (4 bytes)   │(4 bytes) │(4 bytes) │(len-4 b)   │
//! └─────────────┴──────────┴──────────┴────────────┘
//! ```
//!
//! On open the file is replayed into the in-memory maps. A torn final entry
//! (crash mid-append) is truncated away with a warning; a CRC mismatch
//! earlier in the file is corruption and fails the open.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::existence::StreamExistenceFilter;

const NAMES_FILE: &str = "names.idx";

/// Default first allocated stream id.
pub const DEFAULT_FIRST_VALUE: u32 = 1024;

/// Default allocation interval (metastream ids fill the gaps).
pub const DEFAULT_INTERVAL: u32 = 2;

/// Name -> id resolution as consumed by the numeric log format.
#[async_trait]
pub trait NameIndex: Send + Sync {
    /// Id bound to `name`, if any.
    fn lookup_id(&self, name: &str) -> Option<u32>;

    /// Name bound to `id`, if any.
    fn lookup_name(&self, id: u32) -> Option<String>;

    /// Existing binding for `name`, or a freshly allocated one. The flag is
    /// true when the binding was created by this call.
    async fn get_or_reserve(&self, name: &str) -> Result<(u32, bool)>;

    /// All bound names in insertion order. Feeds the existence-filter
    /// initializer, which sees raw names only - metastream names are
    /// derived, never stored.
    fn enumerate_names(&self) -> Vec<String>;
}

struct NameIndexState {
    ids: HashMap<String, u32>,
    names: HashMap<u32, String>,
    order: Vec<String>,
    next_id: u32,
}

/// The raw log-structured name store.
pub struct StreamNameIndex {
    state: RwLock<NameIndexState>,
    // Serializes reservations; holds the append handle when persistent.
    writer: tokio::sync::Mutex<Option<tokio::fs::File>>,
    interval: u32,
}

impl StreamNameIndex {
    /// Open (or create) the store under `dir`.
    pub async fn open(dir: &Path, first_value: u32, interval: u32) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(NAMES_FILE);

        let mut state = NameIndexState {
            ids: HashMap::new(),
            names: HashMap::new(),
            order: Vec::new(),
            next_id: first_value,
        };

        match std::fs::read(&path) {
            Ok(bytes) => {
                let valid_len = replay(&path, &bytes, &mut state, interval)?;
                if valid_len < bytes.len() {
                    // Torn tail from a crash mid-append.
                    tracing::warn!(
                        path = %path.display(),
                        dropped = bytes.len() - valid_len,
                        "truncating torn tail of stream-name index"
                    );
                    let file = std::fs::OpenOptions::new().write(true).open(&path)?;
                    file.set_len(valid_len as u64)?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        tracing::debug!(
            path = %path.display(),
            streams = state.order.len(),
            next_id = state.next_id,
            "stream-name index opened"
        );

        Ok(Self {
            state: RwLock::new(state),
            writer: tokio::sync::Mutex::new(Some(file)),
            interval,
        })
    }

    /// A store with no backing file, for the in-memory mode and tests.
    pub fn in_memory(first_value: u32, interval: u32) -> Self {
        Self {
            state: RwLock::new(NameIndexState {
                ids: HashMap::new(),
                names: HashMap::new(),
                order: Vec::new(),
                next_id: first_value,
            }),
            writer: tokio::sync::Mutex::new(None),
            interval,
        }
    }
}

#[async_trait]
impl NameIndex for StreamNameIndex {
    fn lookup_id(&self, name: &str) -> Option<u32> {
        self.state.read().unwrap().ids.get(name).copied()
    }

    fn lookup_name(&self, id: u32) -> Option<String> {
        self.state.read().unwrap().names.get(&id).cloned()
    }

    async fn get_or_reserve(&self, name: &str) -> Result<(u32, bool)> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty stream name".to_string()));
        }
        if let Some(id) = self.lookup_id(name) {
            return Ok((id, false));
        }

        // Serialize allocations; re-check after acquiring.
        let mut writer = self.writer.lock().await;
        if let Some(id) = self.lookup_id(name) {
            return Ok((id, false));
        }

        let id = self.state.read().unwrap().next_id;
        if let Some(file) = writer.as_mut() {
            file.write_all(&encode_entry(id, name)).await?;
            file.flush().await?;
        }

        let mut state = self.state.write().unwrap();
        state.ids.insert(name.to_string(), id);
        state.names.insert(id, name.to_string());
        state.order.push(name.to_string());
        state.next_id = id + self.interval;

        tracing::debug!(stream = %name, id, "stream name bound");
        Ok((id, true))
    }

    fn enumerate_names(&self) -> Vec<String> {
        self.state.read().unwrap().order.clone()
    }
}

fn encode_entry(id: u32, name: &str) -> Vec<u8> {
    let payload_len = 4 + name.len();
    let mut entry = Vec::with_capacity(8 + payload_len);
    entry.extend_from_slice(&(payload_len as u32).to_le_bytes());

    let mut crc = crc32fast::Hasher::new();
    crc.update(&id.to_le_bytes());
    crc.update(name.as_bytes());
    entry.extend_from_slice(&crc.finalize().to_le_bytes());

    entry.extend_from_slice(&id.to_le_bytes());
    entry.extend_from_slice(name.as_bytes());
    entry
}

/// Replay entries into `state`; returns the length of the valid prefix.
fn replay(
    path: &Path,
    bytes: &[u8],
    state: &mut NameIndexState,
    interval: u32,
) -> Result<usize> {
    let mut at = 0usize;
    while at < bytes.len() {
        if bytes.len() - at < 8 {
            return Ok(at); // torn length/crc header
        }
        let payload_len =
            u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
        let stored_crc = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
        if payload_len < 4 {
            return Err(Error::Corruption(format!(
                "stream-name index {} has an entry of {} bytes",
                path.display(),
                payload_len
            )));
        }
        if bytes.len() - at - 8 < payload_len {
            return Ok(at); // torn payload
        }
        let payload = &bytes[at + 8..at + 8 + payload_len];
        if crc32fast::hash(payload) != stored_crc {
            // A bad CRC mid-file is not a torn append; refuse to guess.
            if at + 8 + payload_len < bytes.len() {
                return Err(Error::Corruption(format!(
                    "stream-name index {} has a CRC mismatch at offset {at}",
                    path.display()
                )));
            }
            return Ok(at);
        }

        let id = u32::from_le_bytes(payload[..4].try_into().unwrap());
        let name = std::str::from_utf8(&payload[4..])
            .map_err(|_| {
                Error::Corruption(format!(
                    "stream-name index {} has a non-UTF-8 name at offset {at}",
                    path.display()
                ))
            })?
            .to_string();

        state.ids.insert(name.clone(), id);
        state.names.insert(id, name.clone());
        state.order.push(name);
        state.next_id = state.next_id.max(id + interval);
        at += 8 + payload_len;
    }
    Ok(at)
}

/// Skips lookups for names the existence filter rules out, and registers
/// freshly reserved names with the filter.
pub struct FilteredNameIndex<I> {
    inner: I,
    filter: Arc<StreamExistenceFilter>,
}

impl<I: NameIndex> FilteredNameIndex<I> {
    pub fn new(inner: I, filter: Arc<StreamExistenceFilter>) -> Self {
        Self { inner, filter }
    }
}

#[async_trait]
impl<I: NameIndex> NameIndex for FilteredNameIndex<I> {
    fn lookup_id(&self, name: &str) -> Option<u32> {
        if !self.filter.might_contain_name(name) {
            return None;
        }
        self.inner.lookup_id(name)
    }

    fn lookup_name(&self, id: u32) -> Option<String> {
        self.inner.lookup_name(id)
    }

    async fn get_or_reserve(&self, name: &str) -> Result<(u32, bool)> {
        let (id, created) = self.inner.get_or_reserve(name).await?;
        if created {
            self.filter.add_name(name);
        }
        Ok((id, created))
    }

    fn enumerate_names(&self) -> Vec<String> {
        self.inner.enumerate_names()
    }
}

/// Translates the `"$$"` naming convention into the id-level low-bit
/// convention. Metastream names are never stored: their ids are derived from
/// the original stream's binding.
pub struct MetastreamNameIndex<I> {
    inner: I,
}

impl<I: NameIndex> MetastreamNameIndex<I> {
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<I: NameIndex> NameIndex for MetastreamNameIndex<I> {
    fn lookup_id(&self, name: &str) -> Option<u32> {
        match name.strip_prefix("$$") {
            Some(original) => self.inner.lookup_id(original).map(|id| id + 1),
            None => self.inner.lookup_id(name),
        }
    }

    fn lookup_name(&self, id: u32) -> Option<String> {
        if id & 1 == 1 {
            self.inner
                .lookup_name(id - 1)
                .map(|original| format!("$${original}"))
        } else {
            self.inner.lookup_name(id)
        }
    }

    async fn get_or_reserve(&self, name: &str) -> Result<(u32, bool)> {
        if name.starts_with("$$") {
            return Err(Error::InvalidArgument(format!(
                "cannot reserve metastream name {name}: metastream ids are derived"
            )));
        }
        self.inner.get_or_reserve(name).await
    }

    fn enumerate_names(&self) -> Vec<String> {
        self.inner.enumerate_names()
    }
}

/// The standard decorator stack over a raw store.
pub fn layered(
    raw: StreamNameIndex,
    filter: Arc<StreamExistenceFilter>,
) -> MetastreamNameIndex<FilteredNameIndex<StreamNameIndex>> {
    MetastreamNameIndex::new(FilteredNameIndex::new(raw, filter))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    // ---------------------------------------------------------------
    // Raw store - allocation
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_ids_follow_arithmetic_sequence() {
        let index = StreamNameIndex::in_memory(1024, 2);
        assert_eq!(index.get_or_reserve("a").await.unwrap(), (1024, true));
        assert_eq!(index.get_or_reserve("b").await.unwrap(), (1026, true));
        assert_eq!(index.get_or_reserve("c").await.unwrap(), (1028, true));
    }

    #[tokio::test]
    async fn test_existing_binding_is_immutable() {
        let index = StreamNameIndex::in_memory(1024, 2);
        let (id, created) = index.get_or_reserve("orders").await.unwrap();
        assert!(created);
        assert_eq!(index.get_or_reserve("orders").await.unwrap(), (id, false));
        assert_eq!(index.lookup_id("orders"), Some(id));
    }

    #[tokio::test]
    async fn test_both_directions_agree() {
        let index = StreamNameIndex::in_memory(1024, 2);
        let (id, _) = index.get_or_reserve("orders").await.unwrap();
        assert_eq!(index.lookup_name(id).as_deref(), Some("orders"));
        assert_eq!(index.lookup_id("orders"), Some(id));
        assert_eq!(index.lookup_name(9999), None);
        assert_eq!(index.lookup_id("absent"), None);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let index = StreamNameIndex::in_memory(1024, 2);
        assert!(matches!(
            index.get_or_reserve("").await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_enumerate_in_insertion_order() {
        let index = StreamNameIndex::in_memory(1024, 2);
        for name in ["c", "a", "b"] {
            index.get_or_reserve(name).await.unwrap();
        }
        assert_eq!(index.enumerate_names(), vec!["c", "a", "b"]);
    }

    // ---------------------------------------------------------------
    // Raw store - persistence
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_replay_restores_bindings_and_next_id() {
        let dir = TempDir::new().unwrap();
        {
            let index = StreamNameIndex::open(dir.path(), 1024, 2).await.unwrap();
            index.get_or_reserve("a").await.unwrap();
            index.get_or_reserve("b").await.unwrap();
        }

        let reopened = StreamNameIndex::open(dir.path(), 1024, 2).await.unwrap();
        assert_eq!(reopened.lookup_id("a"), Some(1024));
        assert_eq!(reopened.lookup_id("b"), Some(1026));
        assert_eq!(reopened.enumerate_names(), vec!["a", "b"]);
        // Allocation resumes after the replayed ids.
        assert_eq!(reopened.get_or_reserve("c").await.unwrap(), (1028, true));
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        {
            let index = StreamNameIndex::open(dir.path(), 1024, 2).await.unwrap();
            index.get_or_reserve("a").await.unwrap();
        }

        // Simulate a crash mid-append of a second entry.
        let path = dir.path().join(NAMES_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let good_len = bytes.len();
        bytes.extend_from_slice(&encode_entry(1026, "torn")[..5]);
        std::fs::write(&path, &bytes).unwrap();

        let reopened = StreamNameIndex::open(dir.path(), 1024, 2).await.unwrap();
        assert_eq!(reopened.lookup_id("a"), Some(1024));
        assert_eq!(reopened.lookup_id("torn"), None);
        assert_eq!(std::fs::read(&path).unwrap().len(), good_len);
        // The truncated store still appends cleanly.
        assert_eq!(reopened.get_or_reserve("b").await.unwrap(), (1026, true));
    }

    #[tokio::test]
    async fn test_mid_file_corruption_rejected() {
        let dir = TempDir::new().unwrap();
        {
            let index = StreamNameIndex::open(dir.path(), 1024, 2).await.unwrap();
            index.get_or_reserve("a").await.unwrap();
            index.get_or_reserve("b").await.unwrap();
        }

        let path = dir.path().join(NAMES_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0xff; // inside the first entry
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            StreamNameIndex::open(dir.path(), 1024, 2).await,
            Err(Error::Corruption(_))
        ));
    }

    // ---------------------------------------------------------------
    // Decorators
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_metastream_lookup_translates() {
        let index = MetastreamNameIndex::new(StreamNameIndex::in_memory(1024, 2));
        let (id, _) = index.get_or_reserve("orders").await.unwrap();
        assert_eq!(index.lookup_id("$$orders"), Some(id + 1));
        assert_eq!(index.lookup_name(id + 1).as_deref(), Some("$$orders"));
        assert_eq!(index.lookup_id("$$absent"), None);
    }

    #[tokio::test]
    async fn test_metastream_reserve_rejected() {
        let index = MetastreamNameIndex::new(StreamNameIndex::in_memory(1024, 2));
        assert!(matches!(
            index.get_or_reserve("$$orders").await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_filter_decorator_skips_absent_names() {
        let filter = Arc::new(StreamExistenceFilter::in_memory(4096));
        let index = FilteredNameIndex::new(StreamNameIndex::in_memory(1024, 2), filter.clone());

        let (id, _) = index.get_or_reserve("orders").await.unwrap();
        // The reserve registered the name with the filter.
        assert!(filter.might_contain_name("orders"));
        assert_eq!(index.lookup_id("orders"), Some(id));
        // Definitely-absent names never reach the inner store.
        assert_eq!(index.lookup_id("never-written"), None);
    }

    #[tokio::test]
    async fn test_layered_stack_end_to_end() {
        let filter = Arc::new(StreamExistenceFilter::in_memory(4096));
        let index = layered(StreamNameIndex::in_memory(1024, 2), filter.clone());

        let (id, created) = index.get_or_reserve("orders").await.unwrap();
        assert!(created);
        assert_eq!(index.lookup_id("$$orders"), Some(id + 1));
        assert!(filter.might_contain_name("orders"));
        // Raw names only in the enumerator.
        assert_eq!(index.enumerate_names(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_filter_initializer_seeds_from_name_index() {
        let index = StreamNameIndex::in_memory(1024, 2);
        index.get_or_reserve("a").await.unwrap();
        index.get_or_reserve("b").await.unwrap();

        let filter = StreamExistenceFilter::in_memory(4096);
        filter.initialize_from_name_index(&index, 77).await.unwrap();

        assert!(filter.might_contain_name("a"));
        assert!(filter.might_contain_name("b"));
        assert!(!filter.might_contain_name("c"));
        assert_eq!(filter.checkpoint(), 77);
    }

    #[tokio::test]
    async fn test_filter_initializer_skips_when_already_populated() {
        let index = StreamNameIndex::in_memory(1024, 2);
        index.get_or_reserve("a").await.unwrap();

        let filter = StreamExistenceFilter::in_memory(4096);
        filter.set_checkpoint(100);
        filter.initialize_from_name_index(&index, 77).await.unwrap();

        // Already ahead of the index checkpoint: no reseeding.
        assert!(!filter.might_contain_name("a"));
        assert_eq!(filter.checkpoint(), 100);
    }
}
