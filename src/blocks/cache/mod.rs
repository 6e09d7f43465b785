// src/blocks/cache/mod.rs
// Key/value cache in front of the row store. Entries are JSON strings so any
// backing store that speaks strings can be plugged in.

mod block_cache;
pub mod keys;

pub use block_cache::{BlockCache, CachePolicy};

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache entry could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Store contract used by the engine. Implementations must be thread-safe.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Deletes every key matching `pattern` and returns how many were removed.
    /// A trailing `*` matches any suffix; otherwise the key must match exactly.
    fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

struct Inner {
    entries: LruCache<String, Entry>,
    // Sorted mirror of `entries` keys, so prefix deletes only visit matches.
    index: BTreeSet<String>,
}

/// In-process store bounded by an LRU capacity.
pub struct MemoryCacheStore {
    inner: Mutex<Inner>,
}

impl MemoryCacheStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                index: BTreeSet::new(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, CacheError> {
        self.inner
            .lock()
            .map_err(|_| CacheError::Unavailable("cache mutex poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently held, in sorted order. Expired entries may still appear
    /// until they are read or evicted.
    pub fn keys(&self) -> Vec<String> {
        self.lock()
            .map(|inner| inner.index.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut inner = self.lock()?;
        let expired = match inner.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.expires_at > Instant::now() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
        };
        if expired {
            inner.entries.pop(key);
            inner.index.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut inner = self.lock()?;
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        if let Some((evicted, _)) = inner.entries.push(key.to_string(), entry) {
            if evicted != key {
                inner.index.remove(&evicted);
            }
        }
        inner.index.insert(key.to_string());
        Ok(())
    }

    fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut inner = self.lock()?;
        let matches: Vec<String> = match pattern.strip_suffix('*') {
            Some(prefix) => inner
                .index
                .range(prefix.to_string()..)
                .take_while(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            None => inner.index.get(pattern).cloned().into_iter().collect(),
        };
        for key in &matches {
            inner.index.remove(key);
            inner.entries.pop(key);
        }
        Ok(matches.len())
    }
}
