// tests/scenarios.rs
// End-to-end behavior of BlockEngine over an in-memory store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use blockdb::blocks::cache::{CacheError, CacheStore, MemoryCacheStore};
use blockdb::blocks::definitions::{
    BulkRowUpdate, Filter, FilterOperator, QueryRequest, RowData, Sort, SortDirection,
};
use blockdb::blocks::{BlockEngine, Column, ColumnType, EngineError};
use blockdb::settings::EngineSettings;
use serde_json::{json, Value};

fn obj(v: Value) -> RowData {
    v.as_object().cloned().unwrap()
}

fn order_columns() -> Vec<Column> {
    vec![
        Column::new("Quantity", ColumnType::Number),
        Column::new("Price", ColumnType::Currency),
        Column::formula("Total", "Quantity*Price"),
    ]
}

fn order_block(engine: &BlockEngine) -> String {
    engine.create_block("Orders", order_columns()).unwrap().id
}

#[test]
fn create_update_conflict_query_delete() {
    let engine = BlockEngine::in_memory().unwrap();
    let block_id = order_block(&engine);

    let row = engine
        .create_row(&block_id, obj(json!({"Quantity": 3, "Price": 10})), "alice")
        .unwrap();
    assert_eq!(row.computed_data["Total"], json!(30));
    assert_eq!(row.version, 1);

    let row = engine
        .update_row(&row.id, obj(json!({"Quantity": 5})), 1, "alice")
        .unwrap();
    assert_eq!(row.computed_data["Total"], json!(50));
    assert_eq!(row.version, 2);

    let stale = engine.update_row(&row.id, obj(json!({"Quantity": 6})), 1, "bob");
    match stale {
        Err(EngineError::Conflict { expected, actual, .. }) => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected a conflict, got {:?}", other),
    }
    let stored = engine.get_row(&row.id).unwrap();
    assert_eq!(stored.data["Quantity"], json!(5));
    assert_eq!(stored.version, 2);

    let result = engine
        .get_rows(&QueryRequest::new(&block_id).with_filter(Filter::new(
            "Quantity",
            FilterOperator::GreaterThan,
            json!(3),
        )))
        .unwrap();
    assert_eq!(result.total_count, 1);
    assert_eq!(result.rows[0].id, row.id);

    assert_eq!(engine.delete_rows(&[row.id.clone()]).unwrap(), 1);
    let result = engine.get_rows(&QueryRequest::new(&block_id)).unwrap();
    assert_eq!(result.total_count, 0);
    assert!(result.rows.is_empty());
}

#[test]
fn bulk_update_of_150_rows_with_one_invalid() {
    let engine = BlockEngine::in_memory().unwrap();
    let block_id = order_block(&engine);
    let created = engine.bulk_create_rows(
        &block_id,
        (0..150).map(|i| obj(json!({"Quantity": i, "Price": 2}))).collect(),
        "loader",
    );
    assert_eq!(created.created, 150);
    assert!(created.errors.is_empty());

    let updates: Vec<BulkRowUpdate> = created
        .row_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let quantity = if i == 119 { json!("many") } else { json!(i + 1) };
            BulkRowUpdate::new(id.clone(), obj(json!({"Quantity": quantity}))).at_version(1)
        })
        .collect();
    let result = engine.bulk_update_rows(&block_id, updates);
    assert_eq!(result.updated, 149);
    assert_eq!(result.errors.len(), 1);

    let untouched = engine.get_row(&created.row_ids[119]).unwrap();
    assert_eq!(untouched.version, 1);
    let last = engine.get_row(&created.row_ids[149]).unwrap();
    assert_eq!(last.version, 2);
    assert_eq!(last.computed_data["Total"], json!(300));
}

#[test]
fn failed_batch_rolls_back_and_later_batches_continue() {
    let engine = BlockEngine::in_memory().unwrap();
    let block_id = order_block(&engine);
    let created = engine.bulk_create_rows(
        &block_id,
        (0..250).map(|i| obj(json!({"Quantity": i, "Price": 1}))).collect(),
        "loader",
    );
    assert_eq!(created.created, 250);

    engine
        .database()
        .write(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_poison BEFORE UPDATE ON block_rows
                 WHEN json_extract(NEW.data, '$.Quantity') = -1
                 BEGIN SELECT RAISE(ABORT, 'poisoned row'); END;",
            )?;
            Ok(())
        })
        .unwrap();

    let updates: Vec<BulkRowUpdate> = created
        .row_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let quantity = if i == 150 { -1 } else { 1000 + i as i64 };
            BulkRowUpdate::new(id.clone(), obj(json!({"Quantity": quantity})))
        })
        .collect();
    let result = engine.bulk_update_rows(&block_id, updates);
    assert_eq!(result.updated, 150);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("batch 2"), "{}", result.errors[0]);

    assert_eq!(engine.get_row(&created.row_ids[0]).unwrap().version, 2);
    // Batch 2 covers rows 100..200: nothing in it persisted.
    assert_eq!(engine.get_row(&created.row_ids[120]).unwrap().version, 1);
    assert_eq!(engine.get_row(&created.row_ids[249]).unwrap().version, 2);
}

#[test]
fn created_rows_read_back_identically() {
    let engine = BlockEngine::in_memory().unwrap();
    let block = engine
        .create_block(
            "Catalog",
            vec![
                Column::new("Sku", ColumnType::Text).unique(),
                Column::new("Quantity", ColumnType::Number),
                Column::new("Price", ColumnType::Currency),
                Column::new("Tags", ColumnType::MultiSelect).with_options(["new", "sale"]),
                Column::formula("Total", "Quantity*Price"),
                Column::formula("Doubled", "Total*2"),
            ],
        )
        .unwrap();
    let row = engine
        .create_row(
            &block.id,
            obj(json!({"Sku": "A-1", "Quantity": 4, "Price": 2.5, "Tags": ["sale"]})),
            "alice",
        )
        .unwrap();

    let result = engine
        .get_rows(&QueryRequest::new(&block.id).with_filter(Filter::new(
            "Sku",
            FilterOperator::Equals,
            json!("A-1"),
        )))
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].data, row.data);
    assert_eq!(result.rows[0].computed_data, row.computed_data);
    assert_eq!(row.computed_data["Total"], json!(10));
    assert_eq!(row.computed_data["Doubled"], json!(20));

    let duplicate = engine.create_row(&block.id, obj(json!({"Sku": "A-1"})), "bob");
    assert!(matches!(duplicate, Err(EngineError::Validation(_))));
}

#[test]
fn every_write_clears_the_block_cache() {
    let store = Arc::new(MemoryCacheStore::new(1000));
    let engine = BlockEngine::in_memory_with(EngineSettings::default(), store.clone()).unwrap();
    let block_id = order_block(&engine);
    let other_id = order_block(&engine);
    let prefix = format!("block:{}:", block_id);
    let cached = || store.keys().iter().filter(|k| k.starts_with(&prefix)).count();

    let row = engine
        .create_row(&block_id, obj(json!({"Quantity": 1, "Price": 1})), "a")
        .unwrap();
    engine.create_row(&other_id, obj(json!({"Quantity": 1})), "a").unwrap();

    let mut request = QueryRequest::new(&block_id);
    request.include_aggregations = true;
    let warm = |engine: &BlockEngine| {
        engine.get_rows(&request).unwrap();
        engine.get_rows(&QueryRequest::new(&other_id)).unwrap();
    };

    warm(&engine);
    assert!(cached() >= 2);
    let row = engine.update_row(&row.id, obj(json!({"Quantity": 7})), 1, "a").unwrap();
    assert_eq!(cached(), 0);
    assert!(store.keys().iter().any(|k| k.starts_with(&format!("block:{}:", other_id))));

    warm(&engine);
    let fresh = engine.get_rows(&request).unwrap();
    assert_eq!(fresh.rows[0].computed_data["Total"], json!(7));

    engine
        .bulk_update_rows(&block_id, vec![BulkRowUpdate::new(row.id.clone(), obj(json!({"Price": 3})))]);
    assert_eq!(cached(), 0);

    warm(&engine);
    engine.add_column(&block_id, Column::new("Note", ColumnType::Text)).unwrap();
    assert_eq!(cached(), 0);

    let by_note = QueryRequest::new(&block_id).with_sort(Sort::new("Note", SortDirection::Asc));
    engine.get_rows(&by_note).unwrap();
    assert!(cached() >= 1);
    engine.remove_column(&block_id, "Note").unwrap();
    assert_eq!(cached(), 0);
    assert!(matches!(engine.get_rows(&by_note), Err(EngineError::Validation(_))));

    warm(&engine);
    engine.delete_rows(&[row.id.clone()]).unwrap();
    assert_eq!(cached(), 0);
    assert_eq!(engine.get_rows(&request).unwrap().total_count, 0);
}

/// Fails every call and counts them.
#[derive(Default)]
struct DownStore {
    calls: Mutex<usize>,
}

impl DownStore {
    fn fail(&self) -> CacheError {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        CacheError::Unavailable("connection refused".into())
    }
}

impl CacheStore for DownStore {
    fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(self.fail())
    }
    fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(self.fail())
    }
    fn delete_pattern(&self, _pattern: &str) -> Result<usize, CacheError> {
        Err(self.fail())
    }
}

#[test]
fn cache_outage_never_fails_an_operation() {
    let store = Arc::new(DownStore::default());
    let engine = BlockEngine::in_memory_with(EngineSettings::default(), store.clone()).unwrap();
    let block_id = order_block(&engine);
    let row = engine
        .create_row(&block_id, obj(json!({"Quantity": 2, "Price": 2})), "a")
        .unwrap();
    let mut request = QueryRequest::new(&block_id).with_sort(Sort::new("Total", SortDirection::Desc));
    request.include_aggregations = true;
    assert_eq!(engine.get_rows(&request).unwrap().total_count, 1);
    engine.update_row(&row.id, obj(json!({"Price": 5})), 1, "a").unwrap();
    assert_eq!(engine.get_rows(&request).unwrap().rows[0].computed_data["Total"], json!(10));
    assert!(*store.calls.lock().unwrap() > 0);
}

/// Commits a row update from inside the first cache populate after `armed`,
/// which lands the write between a read's store query and its populate.
#[derive(Default)]
struct WriteDuringPopulate {
    inner: MemoryCacheStore,
    engine: OnceLock<Weak<BlockEngine>>,
    row_id: OnceLock<String>,
    armed: AtomicBool,
}

impl CacheStore for WriteDuringPopulate {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key)
    }
    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let engine = self.engine.get().and_then(Weak::upgrade).unwrap();
            let row_id = self.row_id.get().unwrap();
            engine.update_row(row_id, obj(json!({"Quantity": 99})), 1, "writer").unwrap();
        }
        self.inner.set(key, value, ttl)
    }
    fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        self.inner.delete_pattern(pattern)
    }
}

#[test]
fn read_racing_a_write_never_caches_the_old_rows() {
    let store = Arc::new(WriteDuringPopulate::default());
    let engine = Arc::new(BlockEngine::in_memory_with(EngineSettings::default(), store.clone()).unwrap());
    assert!(store.engine.set(Arc::downgrade(&engine)).is_ok());
    let block_id = order_block(&engine);
    let row = engine
        .create_row(&block_id, obj(json!({"Quantity": 1, "Price": 1})), "a")
        .unwrap();
    assert!(store.row_id.set(row.id.clone()).is_ok());

    let request = QueryRequest::new(&block_id);
    store.armed.store(true, Ordering::SeqCst);
    let before = engine.get_rows(&request).unwrap();
    assert_eq!(before.rows[0].version, 1);
    assert_eq!(engine.get_row(&row.id).unwrap().version, 2);
    assert!(store.inner.is_empty());

    let after = engine.get_rows(&request).unwrap();
    assert_eq!(after.rows[0].version, 2);
    assert_eq!(after.rows[0].computed_data["Total"], json!(99));
    assert_eq!(engine.get_rows(&request).unwrap().rows[0].version, 2);
}

#[test]
fn racing_writers_on_one_version_produce_one_winner() {
    let engine = Arc::new(BlockEngine::in_memory().unwrap());
    let block_id = order_block(&engine);
    let row = engine
        .create_row(&block_id, obj(json!({"Quantity": 1, "Price": 1})), "a")
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let row_id = row.id.clone();
            thread::spawn(move || engine.update_row(&row_id, obj(json!({"Quantity": 10 + i})), 1, "racer"))
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_retryable_conflict()))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(engine.get_row(&row.id).unwrap().version, 2);
}

#[test]
fn deleted_rows_never_come_back_from_queries() {
    let engine = BlockEngine::in_memory().unwrap();
    let block_id = order_block(&engine);
    let created = engine.bulk_create_rows(
        &block_id,
        (0..10).map(|i| obj(json!({"Quantity": i}))).collect(),
        "a",
    );
    let doomed: Vec<String> = created.row_ids.iter().step_by(2).cloned().collect();
    assert_eq!(engine.delete_rows(&doomed).unwrap(), 5);

    let result = engine.get_rows(&QueryRequest::new(&block_id).paged(100, 0)).unwrap();
    assert_eq!(result.total_count, 5);
    assert!(result.rows.iter().all(|r| r.deleted_at.is_none()));
    assert!(result.rows.iter().all(|r| !doomed.contains(&r.id)));
    assert_eq!(engine.get_block(&block_id).unwrap().row_count, 5);
    assert!(engine.check_block(&block_id).unwrap().is_valid());
    assert_eq!(engine.recompute_block(&block_id).unwrap(), 0);
}
