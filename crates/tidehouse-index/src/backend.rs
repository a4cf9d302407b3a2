//! Index Backend - Versioned Stream-Info Cache
//!
//! Resolving a stream's last event number or metadata from the table index
//! costs range queries and log reads. Both are answered on every read, so
//! the backend keeps two LRU maps in front of the index:
//!
//! - stream id -> last event number
//! - stream id -> metadata
//!
//! ## Who Writes, Who Wins
//!
//! Two parties update the cache:
//!
//! - The **commit pipeline** after persisting a write - the source of truth.
//! - **Readers** after a cache-miss resolution - best effort.
//!
//! A reader's value may be stale by the time it tries to cache it (a commit
//! may have landed in between). To keep stale reader writes from clobbering
//! fresh commits, every slot carries a generation from a global counter:
//!
//! 1. `try_get_*` returns the slot's generation alongside its value; a miss
//!    installs an empty slot with a fresh generation.
//! 2. A reader updates with `update_*_if_matches(gen, ...)`: the write only
//!    lands if the generation still matches. On conflict the reader's value
//!    is dropped and the authoritative cached value is returned instead.
//! 3. The commit pipeline updates with `set_*`, which always wins and
//!    installs a fresh generation, invalidating any outstanding reader
//!    tokens.
//!
//! ## Locking
//!
//! Each map sits behind its own mutex; critical sections are a handful of
//! LRU operations and are never held across awaits.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use lru::LruCache;
use tidehouse_core::metadata::{StreamMetadata, SystemSettings};
use tidehouse_core::streams::StreamId;

/// A cached value plus the generation it was installed under.
#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u64,
    value: Option<T>,
}

/// Versioned two-map stream-info cache plus system settings.
pub struct IndexBackend<Id: StreamId> {
    last_event_numbers: Mutex<LruCache<Id, Slot<i64>>>,
    metadatas: Mutex<LruCache<Id, Slot<StreamMetadata>>>,
    generation: AtomicU64,
    system_settings: RwLock<SystemSettings>,
}

impl<Id: StreamId> IndexBackend<Id> {
    /// `capacity` bounds each of the two maps independently.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            last_event_numbers: Mutex::new(LruCache::new(capacity)),
            metadatas: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
            system_settings: RwLock::new(SystemSettings::default()),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ---------------------------------------------------------------
    // Last event number
    // ---------------------------------------------------------------

    /// Cached last event number and the slot generation to CAS against.
    pub fn try_get_last_event_number(&self, stream: &Id) -> (u64, Option<i64>) {
        let mut cache = self.last_event_numbers.lock().unwrap();
        if let Some(slot) = cache.get(stream) {
            return (slot.generation, slot.value);
        }
        let generation = self.next_generation();
        cache.put(
            stream.clone(),
            Slot {
                generation,
                value: None,
            },
        );
        (generation, None)
    }

    /// Reader-side conditional update. Returns the value that ends up
    /// authoritative: `value` if the CAS landed, the already-cached value if
    /// a fresher write won the race.
    pub fn update_last_event_number_if_matches(
        &self,
        generation: u64,
        stream: &Id,
        value: i64,
    ) -> i64 {
        let mut cache = self.last_event_numbers.lock().unwrap();
        match cache.get_mut(stream) {
            Some(slot) if slot.generation == generation => {
                slot.value = Some(value);
                value
            }
            Some(slot) => slot.value.unwrap_or(value),
            None => value,
        }
    }

    /// Commit-pipeline update. Always wins.
    pub fn set_last_event_number(&self, stream: &Id, value: i64) {
        let generation = self.next_generation();
        self.last_event_numbers.lock().unwrap().put(
            stream.clone(),
            Slot {
                generation,
                value: Some(value),
            },
        );
    }

    // ---------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------

    pub fn try_get_metadata(&self, stream: &Id) -> (u64, Option<StreamMetadata>) {
        let mut cache = self.metadatas.lock().unwrap();
        if let Some(slot) = cache.get(stream) {
            return (slot.generation, slot.value.clone());
        }
        let generation = self.next_generation();
        cache.put(
            stream.clone(),
            Slot {
                generation,
                value: None,
            },
        );
        (generation, None)
    }

    pub fn update_metadata_if_matches(
        &self,
        generation: u64,
        stream: &Id,
        value: StreamMetadata,
    ) -> StreamMetadata {
        let mut cache = self.metadatas.lock().unwrap();
        match cache.get_mut(stream) {
            Some(slot) if slot.generation == generation => {
                slot.value = Some(value.clone());
                value
            }
            Some(slot) => slot.value.clone().unwrap_or(value),
            None => value,
        }
    }

    pub fn set_metadata(&self, stream: &Id, value: StreamMetadata) {
        let generation = self.next_generation();
        self.metadatas.lock().unwrap().put(
            stream.clone(),
            Slot {
                generation,
                value: Some(value),
            },
        );
    }

    // ---------------------------------------------------------------
    // System settings
    // ---------------------------------------------------------------

    pub fn system_settings(&self) -> SystemSettings {
        self.system_settings.read().unwrap().clone()
    }

    pub fn set_system_settings(&self, settings: SystemSettings) {
        *self.system_settings.write().unwrap() = settings;
    }
}
