// src/blocks/engine/schema.rs
// Block and column lifecycle, views, integrity checks.

use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use super::BlockEngine;
use crate::blocks::column_definition::Column;
use crate::blocks::column_type::ColumnType;
use crate::blocks::database::error::{EngineError, EngineResult, FieldError};
use crate::blocks::database::reader::{self, DbReader};
use crate::blocks::database::schema as block_tables;
use crate::blocks::database::validation::{self, IntegrityReport};
use crate::blocks::database::writer::{new_id, now_timestamp, DbWriter, MetadataSource};
use crate::blocks::definitions::{Block, RowData, View, ViewDefinition, SYSTEM_ACTOR};
use crate::blocks::dependency::DependencyTracker;
use crate::blocks::materialize;
use crate::blocks::schema_registry::{changes_derivation, normalize_columns, unknown_view_columns};

impl BlockEngine {
    /// Creates an empty block. Column ids, formulas and references are
    /// validated up front; nothing is stored on failure.
    pub fn create_block(&self, name: &str, mut columns: Vec<Column>) -> EngineResult<Block> {
        if name.trim().is_empty() {
            return Err(EngineError::validation("name", "block name must not be empty"));
        }
        normalize_columns(&mut columns);
        self.registry.validate_columns(&columns)?;

        let now = now_timestamp();
        let block = Block {
            id: new_id(),
            name: name.trim().to_string(),
            schema_version: 1,
            columns,
            views: Vec::new(),
            settings: Value::Object(Default::default()),
            row_count: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        self.db.write(|conn| block_tables::insert_block(conn, &block))?;
        info!(
            "Created block '{}' ({}) with {} columns",
            block.name,
            block.id,
            block.columns.len()
        );
        Ok(block)
    }

    pub fn get_block(&self, block_id: &str) -> EngineResult<Block> {
        self.db.read(|conn| DbReader::read_block(conn, block_id))
    }

    pub fn list_blocks(&self) -> EngineResult<Vec<Block>> {
        self.db.read(DbReader::read_all_blocks)
    }

    /// Appends a column. Existing rows receive its initial value, or their own
    /// metadata for system columns; derived columns are evaluated for every row.
    pub fn add_column(&self, block_id: &str, column: Column) -> EngineResult<Block> {
        let block = self.db.write(|conn| {
            let block = reader::load_block(conn, block_id)?;
            if block.column(&column.column_id).is_some() {
                return Err(EngineError::validation(
                    column.column_id.clone(),
                    "duplicate column id",
                ));
            }
            let mut columns = block.columns.clone();
            columns.push(column.clone());
            normalize_columns(&mut columns);
            let tracker = self.registry.validate_columns(&columns)?;

            let now = now_timestamp();
            block_tables::replace_columns(conn, block_id, &columns)?;
            let added = &columns[columns.len() - 1];
            let filled = populate_column(conn, block_id, added)?;
            block_tables::bump_schema_version(conn, block_id, &now)?;
            let block = reader::load_block(conn, block_id)?;
            if added.is_derived() {
                let ids = reader::active_row_ids(conn, block_id)?;
                self.recompute_rows_in(conn, &block, &tracker, &ids)?;
            }
            debug!("Backfilled column '{}' on {} rows", added.column_id, filled);
            Ok(block)
        })?;
        self.schema_changed(&block, &format!("added column '{}'", column.column_id));
        Ok(block)
    }

    /// Replaces a column definition in place. The id cannot change. A type
    /// change resets stored values the new type rejects; switching between
    /// stored and derived moves the column between `data` and `computedData`.
    pub fn update_column(&self, block_id: &str, column_id: &str, column: Column) -> EngineResult<Block> {
        if column.column_id != column_id {
            return Err(EngineError::validation(
                column_id,
                format!("column id cannot change to '{}'", column.column_id),
            ));
        }
        let block = self.db.write(|conn| {
            let block = reader::load_block(conn, block_id)?;
            let old = block
                .column(column_id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("column {} in block {}", column_id, block_id)))?;
            let mut columns = block.columns.clone();
            for slot in columns.iter_mut() {
                if slot.column_id == column_id {
                    *slot = column.clone();
                }
            }
            normalize_columns(&mut columns);
            let tracker = self.registry.validate_columns(&columns)?;
            let updated = columns
                .iter()
                .find(|c| c.column_id == column_id)
                .cloned()
                .ok_or_else(|| EngineError::Internal(format!("column {} vanished", column_id)))?;

            let now = now_timestamp();
            block_tables::replace_columns(conn, block_id, &columns)?;
            if old.is_derived() != updated.is_derived() || old.column_type.is_system() != updated.column_type.is_system() {
                DbWriter::strip_column(conn, block_id, column_id)?;
                populate_column(conn, block_id, &updated)?;
            } else if old.column_type != updated.column_type && !updated.is_derived() {
                let reset = self.reset_nonconforming(conn, block_id, &updated, &tracker, &columns, &now)?;
                debug!("Reset {} values of column '{}' after type change", reset, column_id);
            }

            let derivation = changes_derivation(&old, &updated);
            if derivation {
                block_tables::bump_schema_version(conn, block_id, &now)?;
            } else {
                block_tables::touch_block(conn, block_id, &now)?;
            }
            let block = reader::load_block(conn, block_id)?;
            if derivation && tracker.derived_columns().next().is_some() {
                let ids = reader::active_row_ids(conn, block_id)?;
                self.recompute_rows_in(conn, &block, &tracker, &ids)?;
            }
            Ok(block)
        })?;
        self.schema_changed(&block, &format!("updated column '{}'", column_id));
        Ok(block)
    }

    /// Drops a column from the schema, from every row and from every view.
    /// Rejected while a formula still references it.
    pub fn remove_column(&self, block_id: &str, column_id: &str) -> EngineResult<Block> {
        let block = self.db.write(|conn| {
            let block = reader::load_block(conn, block_id)?;
            if block.column(column_id).is_none() {
                return Err(EngineError::NotFound(format!(
                    "column {} in block {}",
                    column_id, block_id
                )));
            }
            let current = self.registry.tracker_for(&block)?;
            let dependents = current.dependents_of(column_id);
            if !dependents.is_empty() {
                return Err(EngineError::InvalidSchema(format!(
                    "column '{}' is referenced by {}",
                    column_id,
                    dependents.into_iter().collect::<Vec<_>>().join(", ")
                )));
            }
            let mut columns: Vec<Column> = block
                .columns
                .iter()
                .filter(|c| c.column_id != column_id)
                .cloned()
                .collect();
            normalize_columns(&mut columns);
            self.registry.validate_columns(&columns)?;

            let now = now_timestamp();
            block_tables::replace_columns(conn, block_id, &columns)?;
            let stripped = DbWriter::strip_column(conn, block_id, column_id)?;
            for view in &block.views {
                if let Some(pruned) = prune_view(view, column_id) {
                    block_tables::update_view(conn, &pruned)?;
                }
            }
            block_tables::bump_schema_version(conn, block_id, &now)?;
            debug!("Removed column '{}' from {} rows", column_id, stripped);
            reader::load_block(conn, block_id)
        })?;
        self.schema_changed(&block, &format!("removed column '{}'", column_id));
        Ok(block)
    }

    /// Saves a named filter/sort/projection preset on a block.
    pub fn create_view(&self, block_id: &str, definition: ViewDefinition) -> EngineResult<View> {
        if definition.name.trim().is_empty() {
            return Err(EngineError::validation("name", "view name must not be empty"));
        }
        let view = self.db.write(|conn| {
            let block = reader::load_block(conn, block_id)?;
            let view = View {
                id: new_id(),
                block_id: block.id.clone(),
                name: definition.name.trim().to_string(),
                filters: definition.filters.clone(),
                sorts: definition.sorts.clone(),
                visible_columns: definition.visible_columns.clone(),
            };
            let missing = unknown_view_columns(&view, &block.columns);
            if !missing.is_empty() {
                return Err(EngineError::Validation(
                    missing
                        .into_iter()
                        .map(|id| FieldError::new(id, "unknown column"))
                        .collect(),
                ));
            }
            let now = now_timestamp();
            block_tables::insert_view(conn, &view, &now)?;
            block_tables::touch_block(conn, block_id, &now)?;
            Ok(view)
        })?;
        debug!("Created view '{}' on block {}", view.name, block_id);
        self.invalidate(block_id);
        Ok(view)
    }

    pub fn delete_view(&self, block_id: &str, view_id: &str) -> EngineResult<()> {
        let deleted = self.db.write(|conn| {
            let deleted = block_tables::delete_view(conn, block_id, view_id)?;
            if deleted > 0 {
                block_tables::touch_block(conn, block_id, &now_timestamp())?;
            }
            Ok(deleted)
        })?;
        if deleted == 0 {
            return Err(EngineError::NotFound(format!("view {}", view_id)));
        }
        debug!("Deleted view {} from block {}", view_id, block_id);
        self.invalidate(block_id);
        Ok(())
    }

    /// Scans a block for rows that break the storage invariants.
    pub fn check_block(&self, block_id: &str) -> EngineResult<IntegrityReport> {
        let report = self.db.read(|conn| {
            let block = reader::load_block(conn, block_id)?;
            validation::check_block(conn, &block)
        })?;
        report.log();
        Ok(report)
    }

    fn schema_changed(&self, block: &Block, what: &str) {
        self.registry.forget(&block.id);
        self.invalidate(&block.id);
        info!(
            "Block {} {} (schema v{})",
            block.id, what, block.schema_version
        );
    }

    /// Puts every stored value of `column` the type rejects back to the
    /// column's initial value. Each touched row gets a version bump.
    fn reset_nonconforming(
        &self,
        conn: &Connection,
        block_id: &str,
        column: &Column,
        tracker: &DependencyTracker,
        columns: &[Column],
        now: &str,
    ) -> EngineResult<usize> {
        let ids = reader::active_row_ids(conn, block_id)?;
        let order = tracker.recompute_order([column.column_id.as_str()]);
        let mut reset = 0;
        for row in DbReader::read_active_rows(conn, &ids)? {
            let conforms = row
                .data
                .get(&column.column_id)
                .map_or(true, |v| column.column_type.check_value(v, &column.options).is_ok());
            if conforms {
                continue;
            }
            let mut data: RowData = row.data.clone();
            data.insert(column.column_id.clone(), column.initial_value());
            let mut computed = row.computed_data.clone();
            materialize::compute(columns, &order, &data, &mut computed, self.registry.evaluator());
            if DbWriter::compare_and_update(conn, &row.id, row.version, &data, &computed, SYSTEM_ACTOR, now)? {
                reset += 1;
            }
        }
        Ok(reset)
    }
}

/// Seeds a newly stored column on existing rows. Derived columns are left to
/// the recompute pass.
fn populate_column(conn: &Connection, block_id: &str, column: &Column) -> EngineResult<usize> {
    if column.is_derived() {
        return Ok(0);
    }
    match metadata_source(column.column_type) {
        Some(source) => DbWriter::backfill_from_metadata(conn, block_id, &column.column_id, source),
        None => DbWriter::backfill_column(conn, block_id, &column.column_id, &column.initial_value()),
    }
}

fn metadata_source(column_type: ColumnType) -> Option<MetadataSource> {
    match column_type {
        ColumnType::CreatedTime => Some(MetadataSource::CreatedAt),
        ColumnType::CreatedBy => Some(MetadataSource::CreatedBy),
        ColumnType::LastEditedTime => Some(MetadataSource::UpdatedAt),
        ColumnType::LastEditedBy => Some(MetadataSource::UpdatedBy),
        ColumnType::Text
        | ColumnType::Number
        | ColumnType::Currency
        | ColumnType::Date
        | ColumnType::Select
        | ColumnType::MultiSelect
        | ColumnType::Checkbox
        | ColumnType::Url
        | ColumnType::Email
        | ColumnType::Formula
        | ColumnType::Rollup
        | ColumnType::Lookup => None,
    }
}

/// The view without any reference to `column_id`, or `None` if it had none.
fn prune_view(view: &View, column_id: &str) -> Option<View> {
    let mut pruned = view.clone();
    pruned.filters.retain(|f| f.column_id != column_id);
    pruned.sorts.retain(|s| s.column_id != column_id);
    pruned.visible_columns.retain(|c| c != column_id);
    (pruned != *view).then_some(pruned)
}
