// src/blocks/materialize.rs
// Turns client input into stored row state: defaults, system columns,
// canonical text and derived values.

use serde_json::Value;
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use super::column_definition::Column;
use super::column_type::ColumnType;
use super::definitions::RowData;
use super::formula::{FormulaEvaluator, RowContext};

/// Fills every non-derived column missing from `data` with its default or type
/// zero value, and stamps all system columns.
pub fn materialize_new(columns: &[Column], data: &mut RowData, actor_id: &str, now: &str) {
    for column in columns.iter().filter(|c| !c.is_derived()) {
        if column.column_type.is_system() {
            continue;
        }
        if !data.contains_key(&column.column_id) {
            data.insert(column.column_id.clone(), column.initial_value());
        }
    }
    stamp_system_columns(columns, data, actor_id, now, true);
}

/// Refreshes the last-edited system columns after an update.
pub fn touch(columns: &[Column], data: &mut RowData, actor_id: &str, now: &str) {
    stamp_system_columns(columns, data, actor_id, now, false);
}

fn stamp_system_columns(
    columns: &[Column],
    data: &mut RowData,
    actor_id: &str,
    now: &str,
    creating: bool,
) {
    for column in columns {
        let value = match column.column_type {
            ColumnType::CreatedTime if creating => now,
            ColumnType::CreatedBy if creating => actor_id,
            ColumnType::LastEditedTime => now,
            ColumnType::LastEditedBy => actor_id,
            _ => continue,
        };
        data.insert(column.column_id.clone(), Value::String(value.to_string()));
    }
}

/// NFC-normalizes strings in text-like values so equality and search compare
/// canonical forms.
pub fn normalize_text(data: &mut RowData) {
    for value in data.values_mut() {
        normalize_value(value);
    }
}

fn normalize_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            let normalized: String = s.nfc().collect();
            if normalized != *s {
                *s = normalized;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_value),
        _ => {}
    }
}

/// Evaluates `order` (derived column ids, inputs first) against `data` and
/// writes results into `computed`. Returns the ids whose value changed.
/// An evaluation error stores `null` for that column and is logged.
pub fn compute(
    columns: &[Column],
    order: &[String],
    data: &RowData,
    computed: &mut RowData,
    evaluator: &dyn FormulaEvaluator,
) -> Vec<String> {
    let mut changed = Vec::new();
    for column_id in order {
        let Some(column) = columns.iter().find(|c| &c.column_id == column_id) else {
            continue;
        };
        let value = match column.formula_expression.as_deref() {
            Some(expression) => {
                let context = RowContext::new(columns, data, computed);
                match evaluator.evaluate(expression, &context) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Formula '{}' failed to evaluate: {}", column_id, e);
                        Value::Null
                    }
                }
            }
            None => Value::Null,
        };
        if computed.get(column_id) != Some(&value) {
            computed.insert(column_id.clone(), value);
            changed.push(column_id.clone());
        }
    }
    changed
}

/// Keys whose value differs between two data maps, including keys present in
/// only one of them.
pub fn changed_keys(before: &RowData, after: &RowData) -> Vec<String> {
    let mut keys: Vec<String> = after
        .iter()
        .filter(|(k, v)| before.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    keys.extend(
        before
            .keys()
            .filter(|k| !after.contains_key(*k))
            .cloned(),
    );
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::formula::ArithmeticEvaluator;
    use serde_json::json;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("Name", ColumnType::Text),
            Column::new("Qty", ColumnType::Number),
            Column::new("Done", ColumnType::Checkbox),
            Column::new("Tags", ColumnType::MultiSelect),
            Column::new("Status", ColumnType::Select).with_default(json!("todo")),
            Column::new("Due", ColumnType::Date),
            Column::new("Created", ColumnType::CreatedTime),
            Column::new("Author", ColumnType::CreatedBy),
            Column::new("Editor", ColumnType::LastEditedBy),
            Column::formula("Double", "Qty*2"),
            Column::formula("Quad", "Double*2"),
        ]
    }

    fn obj(value: Value) -> RowData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn new_rows_are_fully_materialized() {
        let cols = columns();
        let mut data = obj(json!({"Qty": 4}));
        materialize_new(&cols, &mut data, "alice", "2026-01-01T00:00:00+00:00");
        assert_eq!(
            Value::Object(data.clone()),
            json!({
                "Name": "", "Qty": 4, "Done": false, "Tags": [], "Status": "todo",
                "Due": null, "Created": "2026-01-01T00:00:00+00:00",
                "Author": "alice", "Editor": "alice"
            })
        );

        touch(&cols, &mut data, "bob", "2026-01-02T00:00:00+00:00");
        assert_eq!(data["Author"], json!("alice"));
        assert_eq!(data["Editor"], json!("bob"));
    }

    #[test]
    fn computes_in_order_and_reports_changes() {
        let cols = columns();
        let data = obj(json!({"Qty": 3}));
        let mut computed = RowData::new();
        let order = vec!["Double".to_string(), "Quad".to_string()];
        let changed = compute(&cols, &order, &data, &mut computed, &ArithmeticEvaluator);
        assert_eq!(changed, order);
        assert_eq!(computed["Quad"], json!(12));

        let again = compute(&cols, &order, &data, &mut computed, &ArithmeticEvaluator);
        assert!(again.is_empty());
    }

    #[test]
    fn evaluation_errors_store_null() {
        let cols = vec![
            Column::new("Qty", ColumnType::Number),
            Column::formula("Ratio", "1 / Qty"),
        ];
        let data = obj(json!({"Qty": 0}));
        let mut computed = RowData::new();
        compute(&cols, &["Ratio".to_string()], &data, &mut computed, &ArithmeticEvaluator);
        assert_eq!(computed["Ratio"], Value::Null);
    }

    #[test]
    fn text_is_nfc_normalized() {
        let mut data = obj(json!({"Name": "Cafe\u{0301}", "Tags": ["e\u{0301}"], "Qty": 1}));
        normalize_text(&mut data);
        assert_eq!(data["Name"], json!("Caf\u{00e9}"));
        assert_eq!(data["Tags"], json!(["\u{00e9}"]));
    }

    #[test]
    fn changed_keys_covers_additions_and_removals() {
        let before = obj(json!({"a": 1, "b": 2}));
        let after = obj(json!({"a": 1, "b": 3, "c": 4}));
        let mut keys = changed_keys(&before, &after);
        keys.sort();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(changed_keys(&after, &obj(json!({"a": 1}))).len(), 2);
    }
}
