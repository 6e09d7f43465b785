// src/blocks/engine/bulk.rs
// Batched writes. Each batch is one transaction; row-level failures are
// recorded and skipped, a storage failure rolls back only its own batch.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::{info, warn};

use super::rows::{active_row, active_rows};
use super::BlockEngine;
use crate::blocks::database::error::{EngineError, EngineResult};
use crate::blocks::database::reader;
use crate::blocks::database::writer::{now_timestamp, DbWriter};
use crate::blocks::definitions::{
    Block, BulkCreateResult, BulkResult, BulkRowUpdate, RowData, SYSTEM_ACTOR,
};
use crate::blocks::dependency::DependencyTracker;
use crate::blocks::materialize;

struct BatchOutcome<T> {
    written: Vec<T>,
    errors: Vec<String>,
}

impl BlockEngine {
    fn load_schema(&self, block_id: &str) -> EngineResult<(Block, Arc<DependencyTracker>)> {
        self.db.read(|conn| {
            let block = reader::load_block(conn, block_id)?;
            let tracker = self.registry.tracker_for(&block)?;
            Ok((block, tracker))
        })
    }

    /// Runs `item` for every element of every batch. Row-level errors are
    /// collected per item, anything else aborts the batch.
    fn run_batches<I, T, F>(&self, items: &[I], mut item: F) -> (Vec<T>, Vec<String>)
    where
        F: FnMut(&Connection, usize, &I, &str) -> EngineResult<T>,
    {
        let batch_size = self.settings.bulk_batch_size.max(1);
        let mut written = Vec::new();
        let mut errors = Vec::new();
        for (batch_index, batch) in items.chunks(batch_size).enumerate() {
            let start = batch_index * batch_size;
            let outcome = self.db.write(|conn| {
                let now = now_timestamp();
                let mut outcome = BatchOutcome {
                    written: Vec::new(),
                    errors: Vec::new(),
                };
                for (offset, entry) in batch.iter().enumerate() {
                    match item(conn, start + offset, entry, &now) {
                        Ok(value) => outcome.written.push(value),
                        Err(e) if e.is_row_level() => outcome.errors.push(e.to_string()),
                        Err(e) => return Err(e),
                    }
                }
                Ok(outcome)
            });
            match outcome {
                Ok(outcome) => {
                    written.extend(outcome.written);
                    errors.extend(outcome.errors);
                }
                Err(e) => {
                    warn!(
                        "Bulk batch {} (items {}..{}) rolled back: {}",
                        batch_index + 1,
                        start,
                        start + batch.len(),
                        e
                    );
                    errors.push(format!(
                        "batch {} (items {}..{}) failed: {}",
                        batch_index + 1,
                        start,
                        start + batch.len(),
                        e
                    ));
                }
            }
        }
        (written, errors)
    }

    /// Applies many row patches. Never fails as a whole: problems are reported
    /// in `errors`, one string per failed row or failed batch.
    pub fn bulk_update_rows(&self, block_id: &str, updates: Vec<BulkRowUpdate>) -> BulkResult {
        let (block, tracker) = match self.load_schema(block_id) {
            Ok(schema) => schema,
            Err(e) => {
                return BulkResult {
                    updated: 0,
                    errors: vec![format!("block {}: {}", block_id, e)],
                }
            }
        };

        let (written, errors) = self.run_batches(&updates, |conn, index, update, now| {
            let current = active_row(conn, &update.row_id)?;
            if current.block_id != block.id {
                return Err(EngineError::NotFound(format!(
                    "row {} in block {}",
                    update.row_id, block.id
                )));
            }
            let actor = update.actor_id.as_deref().unwrap_or(SYSTEM_ACTOR);
            self.update_in(
                conn,
                &block,
                &tracker,
                current,
                update.data.clone(),
                update.expected_version,
                actor,
                now,
            )
            .map(|_| index)
            .map_err(|e| annotate(e, index, &update.row_id))
        });

        if !written.is_empty() {
            self.invalidate(block_id);
        }
        info!(
            "Bulk update on block {}: {} of {} rows written, {} errors",
            block_id,
            written.len(),
            updates.len(),
            errors.len()
        );
        BulkResult {
            updated: written.len(),
            errors,
        }
    }

    /// Creates many rows with the same batch isolation as `bulk_update_rows`.
    pub fn bulk_create_rows(&self, block_id: &str, rows: Vec<RowData>, actor_id: &str) -> BulkCreateResult {
        let (block, tracker) = match self.load_schema(block_id) {
            Ok(schema) => schema,
            Err(e) => {
                return BulkCreateResult {
                    created: 0,
                    row_ids: Vec::new(),
                    errors: vec![format!("block {}: {}", block_id, e)],
                }
            }
        };

        let (row_ids, errors) = self.run_batches(&rows, |conn, index, data, now| {
            self.insert_in(conn, &block, &tracker, data.clone(), actor_id, now)
                .map(|row| row.id)
                .map_err(|e| annotate(e, index, "new"))
        });

        if !row_ids.is_empty() {
            self.invalidate(block_id);
        }
        info!(
            "Bulk create on block {}: {} of {} rows created, {} errors",
            block_id,
            row_ids.len(),
            rows.len(),
            errors.len()
        );
        BulkCreateResult {
            created: row_ids.len(),
            row_ids,
            errors,
        }
    }

    /// Re-evaluates every derived column of every active row. Versions are not
    /// bumped. Returns the number of rows whose derived values changed.
    pub fn recompute_block(&self, block_id: &str) -> EngineResult<usize> {
        let (block, tracker) = self.load_schema(block_id)?;
        let ids = self.db.read(|conn| reader::active_row_ids(conn, block_id))?;
        let mut changed = 0;
        for batch in ids.chunks(self.settings.bulk_batch_size.max(1)) {
            changed += self
                .db
                .write(|conn| self.recompute_rows_in(conn, &block, &tracker, batch))?;
        }
        if changed > 0 {
            self.invalidate(block_id);
        }
        info!("Recomputed block {}: {} of {} rows changed", block_id, changed, ids.len());
        Ok(changed)
    }

    /// Rebuilds `computed_data` from scratch for the given rows inside an open
    /// transaction, dropping keys of columns that are no longer derived.
    pub(super) fn recompute_rows_in(
        &self,
        conn: &Connection,
        block: &Block,
        tracker: &DependencyTracker,
        row_ids: &[String],
    ) -> EngineResult<usize> {
        let order = tracker.full_order();
        let mut changed = 0;
        for row in active_rows(conn, row_ids)? {
            let mut computed = RowData::new();
            materialize::compute(
                &block.columns,
                &order,
                &row.data,
                &mut computed,
                self.registry.evaluator(),
            );
            if computed != row.computed_data && DbWriter::write_computed(conn, &row.id, &computed)? {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// Prefixes a row-level error with its position in the request.
fn annotate(error: EngineError, index: usize, row_id: &str) -> EngineError {
    match error {
        EngineError::NotFound(what) => EngineError::NotFound(format!("#{} {}", index, what)),
        EngineError::Validation(mut fields) => {
            for field in &mut fields {
                field.message = format!("{} (#{} row {})", field.message, index, row_id);
            }
            EngineError::Validation(fields)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use crate::blocks::column_definition::Column;
    use crate::blocks::column_type::ColumnType;
    use crate::blocks::definitions::{BulkRowUpdate, RowData};
    use crate::blocks::engine::BlockEngine;
    use crate::settings::EngineSettings;
    use serde_json::json;
    use std::sync::Arc;

    fn obj(v: serde_json::Value) -> RowData {
        v.as_object().cloned().unwrap()
    }

    fn engine(batch: usize) -> (BlockEngine, String) {
        let settings = EngineSettings {
            bulk_batch_size: batch,
            ..EngineSettings::default()
        };
        let engine = BlockEngine::in_memory_with(
            settings,
            Arc::new(crate::blocks::cache::MemoryCacheStore::default()),
        )
        .unwrap();
        let block = engine
            .create_block(
                "Stock",
                vec![
                    Column::new("Sku", ColumnType::Text).required().unique(),
                    Column::new("Qty", ColumnType::Number),
                    Column::formula("Double", "Qty*2"),
                ],
            )
            .unwrap();
        (engine, block.id)
    }

    #[test]
    fn bulk_create_reports_row_errors_and_keeps_going() {
        let (engine, block_id) = engine(2);
        let rows = vec![
            obj(json!({"Sku": "a", "Qty": 1})),
            obj(json!({"Sku": "a", "Qty": 2})),
            obj(json!({"Sku": "b", "Qty": "x"})),
            obj(json!({"Sku": "c", "Qty": 3})),
        ];
        let result = engine.bulk_create_rows(&block_id, rows, "loader");
        assert_eq!(result.created, 2);
        assert_eq!(result.row_ids.len(), 2);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(engine.get_block(&block_id).unwrap().row_count, 2);
    }

    #[test]
    fn bulk_update_mixes_successes_and_failures() {
        let (engine, block_id) = engine(3);
        let created = engine.bulk_create_rows(
            &block_id,
            (0..5).map(|i| obj(json!({"Sku": format!("s{}", i), "Qty": i}))).collect(),
            "loader",
        );
        let ids = created.row_ids;
        let updates = vec![
            BulkRowUpdate::new(ids[0].clone(), obj(json!({"Qty": 10}))).at_version(1),
            BulkRowUpdate::new(ids[1].clone(), obj(json!({"Qty": 11}))).at_version(7),
            BulkRowUpdate::new("missing", obj(json!({"Qty": 1}))),
            BulkRowUpdate::new(ids[3].clone(), obj(json!({"Double": 1}))),
            BulkRowUpdate::new(ids[4].clone(), obj(json!({"Qty": 14}))),
        ];
        let result = engine.bulk_update_rows(&block_id, updates);
        assert_eq!(result.updated, 2);
        assert_eq!(result.errors.len(), 3);
        assert_eq!(engine.get_row(&ids[4]).unwrap().computed_data["Double"], json!(28));
        assert_eq!(engine.get_row(&ids[1]).unwrap().version, 1);
    }

    #[test]
    fn missing_block_is_one_error() {
        let (engine, _) = engine(10);
        let result = engine.bulk_update_rows("nope", vec![BulkRowUpdate::new("r", RowData::new())]);
        assert_eq!(result.updated, 0);
        assert_eq!(result.errors.len(), 1);
        let created = engine.bulk_create_rows("nope", vec![RowData::new()], "x");
        assert_eq!(created.errors.len(), 1);
    }

    #[test]
    fn row_from_another_block_is_rejected() {
        let (engine, block_id) = engine(10);
        let other = engine
            .create_block("Other", vec![Column::new("Qty", ColumnType::Number)])
            .unwrap();
        let foreign = engine.create_row(&other.id, obj(json!({"Qty": 1})), "x").unwrap();
        let result = engine.bulk_update_rows(
            &block_id,
            vec![BulkRowUpdate::new(foreign.id.clone(), obj(json!({"Qty": 2})))],
        );
        assert_eq!(result.updated, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(engine.get_row(&foreign.id).unwrap().version, 1);
    }
}
