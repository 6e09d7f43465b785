// src/blocks/engine/rows.rs
// Single-row writes: create, versioned update, soft delete.

use std::collections::BTreeSet;

use rusqlite::Connection;
use tracing::debug;

use super::BlockEngine;
use crate::blocks::database::error::{EngineError, EngineResult};
use crate::blocks::database::reader::{self, DbReader};
use crate::blocks::database::schema as block_tables;
use crate::blocks::database::validation::validate_row;
use crate::blocks::database::writer::{new_id, now_timestamp, DbWriter};
use crate::blocks::definitions::{Block, Row, RowData, RowMetadata, SYSTEM_ACTOR};
use crate::blocks::dependency::DependencyTracker;
use crate::blocks::materialize::{self, changed_keys, normalize_text};

impl BlockEngine {
    /// Creates a row at version 1 with every column materialized and every
    /// derived column evaluated.
    pub fn create_row(&self, block_id: &str, data: RowData, actor_id: &str) -> EngineResult<Row> {
        let row = self.db.write(|conn| {
            let block = reader::load_block(conn, block_id)?;
            let tracker = self.registry.tracker_for(&block)?;
            let now = now_timestamp();
            self.insert_in(conn, &block, &tracker, data.clone(), actor_id, &now)
        })?;
        debug!("Created row {} in block {}", row.id, block_id);
        self.invalidate(block_id);
        Ok(row)
    }

    /// Applies `patch` when the stored row is at `expected_version`.
    pub fn update_row(
        &self,
        row_id: &str,
        patch: RowData,
        expected_version: i64,
        actor_id: &str,
    ) -> EngineResult<Row> {
        let row = self.db.write(|conn| {
            let current = active_row(conn, row_id)?;
            let block = reader::load_block(conn, &current.block_id)?;
            let tracker = self.registry.tracker_for(&block)?;
            let now = now_timestamp();
            self.update_in(
                conn,
                &block,
                &tracker,
                current,
                patch.clone(),
                Some(expected_version),
                actor_id,
                &now,
            )
        })?;
        debug!("Updated row {} to version {}", row.id, row.version);
        self.invalidate(&row.block_id);
        Ok(row)
    }

    /// Soft-deletes the given rows. Unknown and already deleted ids are skipped.
    /// Returns how many rows were deleted.
    pub fn delete_rows(&self, row_ids: &[String]) -> EngineResult<usize> {
        self.delete_rows_as(row_ids, SYSTEM_ACTOR)
    }

    pub fn delete_rows_as(&self, row_ids: &[String], actor_id: &str) -> EngineResult<usize> {
        let touched = self.db.write(|conn| {
            let now = now_timestamp();
            let mut touched: Vec<String> = Vec::new();
            let mut deleted = 0usize;
            for row_id in row_ids {
                let Some(row) = reader::find_row(conn, row_id)? else {
                    continue;
                };
                if row.is_deleted() {
                    continue;
                }
                if DbWriter::soft_delete_row(conn, row_id, actor_id, &now)? {
                    block_tables::adjust_row_count(conn, &row.block_id, -1)?;
                    block_tables::touch_block(conn, &row.block_id, &now)?;
                    touched.push(row.block_id);
                    deleted += 1;
                }
            }
            Ok((deleted, touched))
        })?;
        let (deleted, blocks) = touched;
        let blocks: BTreeSet<String> = blocks.into_iter().collect();
        for block_id in &blocks {
            self.invalidate(block_id);
        }
        debug!("Deleted {} rows across {} blocks", deleted, blocks.len());
        Ok(deleted)
    }

    /// Active row by id.
    pub fn get_row(&self, row_id: &str) -> EngineResult<Row> {
        self.db.read(|conn| active_row(conn, row_id))
    }

    /// Insert inside an open transaction. Shared with bulk create.
    pub(super) fn insert_in(
        &self,
        conn: &Connection,
        block: &Block,
        tracker: &DependencyTracker,
        mut input: RowData,
        actor_id: &str,
        now: &str,
    ) -> EngineResult<Row> {
        normalize_text(&mut input);
        let mut data = input.clone();
        materialize::materialize_new(&block.columns, &mut data, actor_id, now);
        validate_row(conn, block, &input, &data, None)?;

        let mut computed = RowData::new();
        materialize::compute(
            &block.columns,
            &tracker.full_order(),
            &data,
            &mut computed,
            self.registry.evaluator(),
        );

        let (position, auto_number) = reader::next_row_slot(conn, &block.id)?;
        let row = Row {
            id: new_id(),
            block_id: block.id.clone(),
            data,
            computed_data: computed,
            version: 1,
            position,
            auto_number,
            deleted_at: None,
            metadata: Some(RowMetadata {
                created_at: now.to_string(),
                updated_at: now.to_string(),
                created_by: actor_id.to_string(),
                updated_by: actor_id.to_string(),
            }),
        };
        DbWriter::insert_row(conn, &row)?;
        block_tables::adjust_row_count(conn, &block.id, 1)?;
        block_tables::touch_block(conn, &block.id, now)?;
        Ok(row)
    }

    /// Versioned update inside an open transaction. `expected_version` of
    /// `None` writes against whatever version `current` holds.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn update_in(
        &self,
        conn: &Connection,
        block: &Block,
        tracker: &DependencyTracker,
        current: Row,
        mut patch: RowData,
        expected_version: Option<i64>,
        actor_id: &str,
        now: &str,
    ) -> EngineResult<Row> {
        let expected = expected_version.unwrap_or(current.version);
        if expected != current.version {
            return Err(EngineError::Conflict {
                row_id: current.id,
                expected,
                actual: current.version,
            });
        }

        normalize_text(&mut patch);
        let mut data = current.data.clone();
        for (key, value) in &patch {
            data.insert(key.clone(), value.clone());
        }
        materialize::touch(&block.columns, &mut data, actor_id, now);
        validate_row(conn, block, &patch, &data, Some(&current.id))?;

        let changed = changed_keys(&current.data, &data);
        let order = tracker.recompute_order(changed.iter().map(String::as_str));
        let mut computed = current.computed_data.clone();
        materialize::compute(
            &block.columns,
            &order,
            &data,
            &mut computed,
            self.registry.evaluator(),
        );

        if !DbWriter::compare_and_update(conn, &current.id, expected, &data, &computed, actor_id, now)? {
            // Lost the race between read and write: report what is stored now.
            return Err(match reader::find_row(conn, &current.id)? {
                Some(stored) if !stored.is_deleted() => EngineError::Conflict {
                    row_id: current.id,
                    expected,
                    actual: stored.version,
                },
                _ => EngineError::NotFound(format!("row {}", current.id)),
            });
        }
        block_tables::touch_block(conn, &block.id, now)?;

        let metadata = current.metadata.map(|m| RowMetadata {
            updated_at: now.to_string(),
            updated_by: actor_id.to_string(),
            ..m
        });
        Ok(Row {
            data,
            computed_data: computed,
            version: expected + 1,
            metadata,
            ..current
        })
    }
}

/// Loads a row that exists and is not soft-deleted.
pub(super) fn active_row(conn: &Connection, row_id: &str) -> EngineResult<Row> {
    match reader::find_row(conn, row_id)? {
        Some(row) if !row.is_deleted() => Ok(row),
        _ => Err(EngineError::NotFound(format!("row {}", row_id))),
    }
}

/// Active rows of `ids`, for batch work.
pub(super) fn active_rows(conn: &Connection, ids: &[String]) -> EngineResult<Vec<Row>> {
    DbReader::read_active_rows(conn, ids)
}

#[cfg(test)]
mod tests {
    use crate::blocks::column_definition::Column;
    use crate::blocks::column_type::ColumnType;
    use crate::blocks::database::error::EngineError;
    use crate::blocks::engine::BlockEngine;
    use serde_json::{json, Value};

    fn obj(v: Value) -> crate::blocks::definitions::RowData {
        v.as_object().cloned().unwrap()
    }

    fn engine_with_block() -> (BlockEngine, String) {
        let engine = BlockEngine::in_memory().unwrap();
        let block = engine
            .create_block(
                "Orders",
                vec![
                    Column::new("Item", ColumnType::Text).required(),
                    Column::new("Quantity", ColumnType::Number),
                    Column::new("Price", ColumnType::Currency),
                    Column::formula("Total", "Quantity*Price"),
                    Column::formula("WithTax", "Total*2"),
                    Column::new("Editor", ColumnType::LastEditedBy),
                ],
            )
            .unwrap();
        (engine, block.id)
    }

    #[test]
    fn chained_formulas_follow_updates() {
        let (engine, block_id) = engine_with_block();
        let row = engine
            .create_row(&block_id, obj(json!({"Item": "pen", "Quantity": 2, "Price": 3})), "alice")
            .unwrap();
        assert_eq!(row.computed_data["WithTax"], json!(12));
        assert_eq!(row.data["Editor"], json!("alice"));

        let row = engine
            .update_row(&row.id, obj(json!({"Price": 5})), 1, "bob")
            .unwrap();
        assert_eq!(row.version, 2);
        assert_eq!(row.computed_data["Total"], json!(10));
        assert_eq!(row.computed_data["WithTax"], json!(20));
        assert_eq!(row.data["Editor"], json!("bob"));
        assert_eq!(engine.get_row(&row.id).unwrap(), row);
    }

    #[test]
    fn writes_to_derived_or_unknown_columns_are_rejected() {
        let (engine, block_id) = engine_with_block();
        let err = engine
            .create_row(&block_id, obj(json!({"Item": "x", "Total": 5, "Nope": 1})), "alice")
            .unwrap_err();
        assert_eq!(err.field_errors().len(), 2);

        let err = engine.create_row(&block_id, obj(json!({})), "alice").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn deleted_rows_are_gone_for_reads_and_writes() {
        let (engine, block_id) = engine_with_block();
        let row = engine
            .create_row(&block_id, obj(json!({"Item": "pen"})), "alice")
            .unwrap();
        let ids = vec![row.id.clone(), "missing".to_string()];
        assert_eq!(engine.delete_rows(&ids).unwrap(), 1);
        assert_eq!(engine.delete_rows(&ids).unwrap(), 0);
        assert!(matches!(engine.get_row(&row.id), Err(EngineError::NotFound(_))));
        assert!(matches!(
            engine.update_row(&row.id, obj(json!({"Item": "x"})), 2, "bob"),
            Err(EngineError::NotFound(_))
        ));
        assert_eq!(engine.get_block(&block_id).unwrap().row_count, 0);
    }
}
