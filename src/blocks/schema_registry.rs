// src/blocks/schema_registry.rs
// Column-set validation and a per-block cache of dependency trackers.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::column_definition::Column;
use super::column_type::ColumnType;
use super::database::error::{EngineError, EngineResult, FieldError};
use super::definitions::{Block, View};
use super::dependency::DependencyTracker;
use super::formula::FormulaEvaluator;

/// Trackers are rebuilt whenever a block's `schema_version` moves, so a stale
/// entry can never be served after a schema mutation.
pub struct SchemaRegistry {
    evaluator: Arc<dyn FormulaEvaluator>,
    trackers: Mutex<HashMap<String, (i64, Arc<DependencyTracker>)>>,
}

impl SchemaRegistry {
    pub fn new(evaluator: Arc<dyn FormulaEvaluator>) -> Self {
        Self {
            evaluator,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    pub fn evaluator(&self) -> &dyn FormulaEvaluator {
        self.evaluator.as_ref()
    }

    /// Tracker for the block's current schema version, building it on first use.
    pub fn tracker_for(&self, block: &Block) -> EngineResult<Arc<DependencyTracker>> {
        {
            let trackers = self
                .trackers
                .lock()
                .map_err(|_| EngineError::Internal("tracker cache poisoned".to_string()))?;
            if let Some((version, tracker)) = trackers.get(&block.id) {
                if *version == block.schema_version {
                    return Ok(Arc::clone(tracker));
                }
            }
        }
        let tracker = Arc::new(DependencyTracker::build(&block.columns, self.evaluator())?);
        debug!(
            "Built dependency tracker for block {} (schema v{}, {} derived columns)",
            block.id,
            block.schema_version,
            tracker.derived_columns().count()
        );
        self.trackers
            .lock()
            .map_err(|_| EngineError::Internal("tracker cache poisoned".to_string()))?
            .insert(block.id.clone(), (block.schema_version, Arc::clone(&tracker)));
        Ok(tracker)
    }

    pub fn forget(&self, block_id: &str) {
        if let Ok(mut trackers) = self.trackers.lock() {
            trackers.remove(block_id);
        }
    }

    /// Validates a complete column set and returns its tracker. Every schema
    /// mutation runs through here before anything is persisted.
    pub fn validate_columns(&self, columns: &[Column]) -> EngineResult<DependencyTracker> {
        let mut errors = Vec::new();
        let mut seen = BTreeSet::new();
        for column in columns {
            if let Err(message) = Column::check_id(&column.column_id) {
                errors.push(FieldError::new(column.column_id.clone(), message));
                continue;
            }
            if !seen.insert(column.column_id.as_str()) {
                errors.push(FieldError::new(
                    column.column_id.clone(),
                    "duplicate column id",
                ));
            }
            if column.name.trim().is_empty() {
                errors.push(FieldError::new(column.column_id.clone(), "name must not be empty"));
            }
            if column.is_derived() && (column.is_required || column.is_unique) {
                errors.push(FieldError::new(
                    column.column_id.clone(),
                    "derived columns cannot be required or unique",
                ));
            }
            if !column.is_derived() && column.formula_expression.is_some() {
                errors.push(FieldError::new(
                    column.column_id.clone(),
                    format!("{} columns cannot carry a formula", column.column_type.as_str()),
                ));
            }
            if !matches!(column.column_type, ColumnType::Select | ColumnType::MultiSelect)
                && !column.options.is_empty()
            {
                errors.push(FieldError::new(
                    column.column_id.clone(),
                    "only select columns take options",
                ));
            }
            if let Some(default) = &column.default_value {
                if column.is_derived() || column.column_type.is_system() {
                    errors.push(FieldError::new(
                        column.column_id.clone(),
                        "computed columns cannot have a default",
                    ));
                } else if let Err(message) = column.column_type.check_value(default, &column.options) {
                    errors.push(FieldError::new(
                        column.column_id.clone(),
                        format!("default value: {}", message),
                    ));
                }
            }
        }
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        DependencyTracker::build(columns, self.evaluator())
    }
}

/// Columns normalized for persistence: `is_formula` synced with the type and
/// positions made dense in the given order.
pub fn normalize_columns(columns: &mut [Column]) {
    for (index, column) in columns.iter_mut().enumerate() {
        column.ensure_type_consistency();
        column.position = index as i64;
    }
}

/// True when a change to `old` requires recomputing derived values.
pub fn changes_derivation(old: &Column, new: &Column) -> bool {
    old.column_type != new.column_type || old.formula_expression != new.formula_expression
}

/// Column ids referenced by a view that are missing from `columns`.
pub fn unknown_view_columns(view: &View, columns: &[Column]) -> Vec<String> {
    let known: BTreeSet<&str> = columns.iter().map(|c| c.column_id.as_str()).collect();
    let mut missing: Vec<String> = view
        .filters
        .iter()
        .map(|f| f.column_id.as_str())
        .chain(view.sorts.iter().map(|s| s.column_id.as_str()))
        .chain(view.visible_columns.iter().map(String::as_str))
        .filter(|id| !known.contains(id))
        .map(str::to_string)
        .collect();
    missing.sort();
    missing.dedup();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::formula::ArithmeticEvaluator;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(Arc::new(ArithmeticEvaluator))
    }

    fn block(columns: Vec<Column>, schema_version: i64) -> Block {
        Block {
            id: "b1".into(),
            name: "Orders".into(),
            schema_version,
            columns,
            views: Vec::new(),
            settings: json!({}),
            row_count: 0,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn collects_every_column_problem() {
        let columns = vec![
            Column::new("Qty", ColumnType::Number),
            Column::new("Qty", ColumnType::Number),
            Column::new("Total", ColumnType::Formula).with_formula("Qty").required(),
            Column::new("Flag", ColumnType::Checkbox).with_default(json!("yes")),
            Column::new("Name", ColumnType::Text).with_options(["a"]),
        ];
        match registry().validate_columns(&columns) {
            Err(EngineError::Validation(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn tracker_is_rebuilt_when_schema_version_moves() {
        let registry = registry();
        let v1 = block(
            vec![
                Column::new("Qty", ColumnType::Number),
                Column::formula("Double", "Qty*2"),
            ],
            1,
        );
        let first = registry.tracker_for(&v1).unwrap();
        let again = registry.tracker_for(&v1).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let mut v2 = v1.clone();
        v2.schema_version = 2;
        v2.columns.push(Column::formula("Triple", "Qty*3"));
        let rebuilt = registry.tracker_for(&v2).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(rebuilt.affected_by(["Qty"]).len(), 2);
    }

    #[test]
    fn normalizes_positions_and_flags() {
        let mut columns = vec![
            Column::new("B", ColumnType::Text),
            Column::formula("A", "1"),
        ];
        columns[1].is_formula = false;
        normalize_columns(&mut columns);
        assert_eq!(columns[0].position, 0);
        assert_eq!(columns[1].position, 1);
        assert!(columns[1].is_formula);
    }
}
