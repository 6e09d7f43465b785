// src/blocks/engine/mod.rs
// BlockEngine: the public surface over schema, rows, queries and bulk writes.

mod bulk;
mod query;
mod rows;
mod schema;

use std::sync::Arc;

use super::cache::{BlockCache, CacheStore, MemoryCacheStore};
use super::database::{Database, EngineResult};
use super::formula::{ArithmeticEvaluator, FormulaEvaluator};
use super::schema_registry::SchemaRegistry;
use crate::settings::EngineSettings;

/// Owns the store handle, the cache and the schema registry. All operations
/// take `&self`; the engine is `Send + Sync` and can be shared behind an `Arc`.
pub struct BlockEngine {
    db: Database,
    registry: SchemaRegistry,
    cache: BlockCache,
    settings: EngineSettings,
}

impl BlockEngine {
    pub fn new(
        db: Database,
        cache_store: Arc<dyn CacheStore>,
        evaluator: Arc<dyn FormulaEvaluator>,
        settings: EngineSettings,
    ) -> Self {
        let cache = BlockCache::new(cache_store, settings.cache_policy());
        Self {
            db,
            registry: SchemaRegistry::new(evaluator),
            cache,
            settings,
        }
    }

    /// File-backed engine with the in-process cache and the arithmetic evaluator.
    pub fn open(settings: EngineSettings) -> EngineResult<Self> {
        let db = Database::open(&settings.store_config())?;
        let store = Arc::new(MemoryCacheStore::new(settings.cache.capacity));
        Ok(Self::new(db, store, Arc::new(ArithmeticEvaluator), settings))
    }

    pub fn in_memory() -> EngineResult<Self> {
        Self::in_memory_with(EngineSettings::default(), Arc::new(MemoryCacheStore::default()))
    }

    pub fn in_memory_with(settings: EngineSettings, cache_store: Arc<dyn CacheStore>) -> EngineResult<Self> {
        Ok(Self::new(
            Database::open_in_memory()?,
            cache_store,
            Arc::new(ArithmeticEvaluator),
            settings,
        ))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn invalidate(&self, block_id: &str) {
        self.cache.invalidate_block(block_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BlockEngine>();
    }
}
