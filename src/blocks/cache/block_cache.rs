// src/blocks/cache/block_cache.rs
// Typed access to the cache families of a block. Cache trouble is never
// surfaced: reads degrade to misses, writes and invalidations log and move on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{trace, warn};

use super::keys;
use super::CacheStore;
use crate::blocks::column_type::AggregationType;
use crate::blocks::definitions::{Aggregation, QueryRequest, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub short_ttl: Duration,
    pub long_ttl: Duration,
    /// Result sets with more rows than this get the short TTL.
    pub large_result_threshold: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            short_ttl: Duration::from_secs(300),
            long_ttl: Duration::from_secs(3600),
            large_result_threshold: 100,
        }
    }
}

impl CachePolicy {
    pub fn ttl_for(&self, result_size: usize) -> Duration {
        if result_size > self.large_result_threshold {
            self.short_ttl
        } else {
            self.long_ttl
        }
    }
}

/// Populates carry the block generation observed before their store read.
/// Invalidation bumps the generation before deleting, and a populate checks it
/// both before and after its write, so an entry built from pre-write data never
/// outlives the invalidation.
#[derive(Clone)]
pub struct BlockCache {
    store: Arc<dyn CacheStore>,
    policy: CachePolicy,
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl BlockCache {
    pub fn new(store: Arc<dyn CacheStore>, policy: CachePolicy) -> Self {
        Self {
            store,
            policy,
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn generations(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        // The map holds plain counters, so a poisoned guard is still usable.
        self.generations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current generation of the block; read it before loading what will be cached.
    pub fn generation(&self, block_id: &str) -> u64 {
        self.generations().get(block_id).copied().unwrap_or(0)
    }

    fn write_if_current<T: Serialize>(
        &self,
        block_id: &str,
        observed: u64,
        key: &str,
        value: &T,
        ttl: Duration,
    ) {
        let current = self.generation(block_id);
        if current != observed {
            trace!(
                "Skipping cache populate {}: block {} moved from generation {} to {}",
                key, block_id, observed, current
            );
            return;
        }
        self.write(key, value, ttl);
        if self.generation(block_id) != observed {
            trace!("Block {} invalidated during populate, dropping {}", block_id, key);
            if let Err(e) = self.store.delete_pattern(key) {
                warn!("Could not drop stale cache entry {}: {}", key, e);
            }
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key) {
            Ok(Some(text)) => match serde_json::from_str(&text) {
                Ok(value) => {
                    trace!("Cache hit {}", key);
                    Some(value)
                }
                Err(e) => {
                    warn!("Discarding undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(e) => {
                warn!("Cache entry {} could not be encoded: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(key, text, ttl) {
            warn!("Cache write failed for {}: {}", key, e);
        }
    }

    pub fn get_query(&self, request: &QueryRequest) -> Option<QueryResult> {
        let key = keys::query_key(request).ok()?;
        self.read(&key)
    }

    pub fn put_query(&self, request: &QueryRequest, result: &QueryResult, observed: u64) {
        match keys::query_key(request) {
            Ok(key) => self.write_if_current(
                &request.block_id,
                observed,
                &key,
                result,
                self.policy.ttl_for(result.rows.len()),
            ),
            Err(e) => warn!("Could not build cache key for block {}: {}", request.block_id, e),
        }
    }

    pub fn get_aggregation(
        &self,
        block_id: &str,
        column_id: &str,
        kind: AggregationType,
        filter_hash: &str,
    ) -> Option<Aggregation> {
        self.read(&keys::aggregation_key(block_id, column_id, kind, filter_hash))
    }

    pub fn put_aggregation(
        &self,
        block_id: &str,
        column_id: &str,
        kind: AggregationType,
        filter_hash: &str,
        aggregation: &Aggregation,
        covered_rows: usize,
        observed: u64,
    ) {
        let key = keys::aggregation_key(block_id, column_id, kind, filter_hash);
        self.write_if_current(block_id, observed, &key, aggregation, self.policy.ttl_for(covered_rows));
    }

    /// Drops every cached entry of the block and retires its generation, so
    /// reads that started before the call cannot populate afterwards.
    pub fn invalidate_block(&self, block_id: &str) {
        *self.generations().entry(block_id.to_string()).or_insert(0) += 1;
        match self.store.delete_pattern(&keys::block_pattern(block_id)) {
            Ok(removed) => trace!("Invalidated {} cache entries for block {}", removed, block_id),
            Err(e) => warn!("Cache invalidation failed for block {}: {}", block_id, e),
        }
    }
}
