use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{MAX_CACHE_SIZE, MAX_OBJECT_SIZE};

/// Shared in-memory response cache keyed by request URI.
///
/// Lookups proceed concurrently under the read side of the gate; admissions
/// and evictions hold the write side. Recency is tracked with a process-wide
/// tick counter stamped into each entry on insert and refreshed on every
/// hit. The stamp lives in an atomic field so a hit needs no write lock;
/// concurrent hits racing to nearby tick values are harmless.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    state: Arc<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    inner: RwLock<CacheInner>,
    tick: AtomicU64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    current_size: usize,
}

#[derive(Debug)]
struct CacheEntry {
    body: Bytes,
    last_access: AtomicU64,
}

impl Cache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_tick(&self) -> u64 {
        self.state.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Looks up a cached response for the given request URI.
    ///
    /// A hit refreshes the entry's access stamp, making it the most recently
    /// used. A URI with a trailing slash also matches the entry stored
    /// without it.
    pub async fn lookup(&self, uri: &str) -> Option<Bytes> {
        let inner = self.state.inner.read().await;
        let entry = match inner.entries.get(uri) {
            Some(entry) => entry,
            None => inner.entries.get(uri.strip_suffix('/')?)?,
        };
        entry.last_access.store(self.next_tick(), Ordering::Relaxed);
        Some(entry.body.clone())
    }

    /// Admits a response under the given request URI key.
    ///
    /// Objects larger than [`MAX_OBJECT_SIZE`] are silently ignored. An
    /// existing entry with the same key is replaced. Least recently used
    /// entries are evicted one at a time until the object fits within
    /// [`MAX_CACHE_SIZE`].
    pub async fn admit(&self, uri: &str, body: Bytes) {
        if body.len() > MAX_OBJECT_SIZE {
            debug!(uri, len = body.len(), "object exceeds cache limit, skipping");
            return;
        }
        let mut inner = self.state.inner.write().await;
        if let Some(previous) = inner.entries.remove(uri) {
            inner.current_size -= previous.body.len();
        }
        while inner.current_size + body.len() > MAX_CACHE_SIZE {
            if !inner.evict_oldest() {
                break;
            }
        }
        debug!(uri, len = body.len(), "cached");
        inner.current_size += body.len();
        inner.entries.insert(
            uri.to_string(),
            CacheEntry {
                body,
                last_access: AtomicU64::new(self.next_tick()),
            },
        );
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.state.inner.read().await.entries.len()
    }

    /// Returns whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Summed size in bytes of all cached objects.
    pub async fn current_size(&self) -> usize {
        self.state.inner.read().await.current_size
    }
}

impl CacheInner {
    /// Removes the entry with the smallest access stamp.
    fn evict_oldest(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                if let Some(entry) = self.entries.remove(&key) {
                    debug!(uri = %key, len = entry.body.len(), "evicted");
                    self.current_size -= entry.body.len();
                }
                true
            }
            None => false,
        }
    }
}
