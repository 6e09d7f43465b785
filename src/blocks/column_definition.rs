// src/blocks/column_definition.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::column_type::ColumnType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub column_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Mirrors `column_type.is_derived()`; kept so clients can read it directly.
    #[serde(default)]
    pub is_formula: bool,
    #[serde(default)]
    pub formula_expression: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    /// Allowed values for select / multi-select columns. Empty means any value.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub position: i64,
}

impl Column {
    pub fn new(column_id: impl Into<String>, column_type: ColumnType) -> Self {
        let column_id = column_id.into();
        Column {
            name: column_id.clone(),
            column_id,
            column_type,
            is_formula: column_type.is_derived(),
            formula_expression: None,
            is_required: false,
            is_unique: false,
            default_value: None,
            options: Vec::new(),
            position: 0,
        }
    }

    pub fn formula(column_id: impl Into<String>, expression: impl Into<String>) -> Self {
        Column::new(column_id, ColumnType::Formula).with_formula(expression)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_formula(mut self, expression: impl Into<String>) -> Self {
        self.formula_expression = Some(expression.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_derived(&self) -> bool {
        self.column_type.is_derived()
    }

    /// Re-syncs `is_formula` with the column type. Returns true when it changed.
    pub fn ensure_type_consistency(&mut self) -> bool {
        let expected = self.column_type.is_derived();
        if self.is_formula != expected {
            self.is_formula = expected;
            true
        } else {
            false
        }
    }

    /// Value materialized when a row is created without this column.
    pub fn initial_value(&self) -> Value {
        self.default_value
            .clone()
            .unwrap_or_else(|| self.column_type.zero_value())
    }

    /// JSON path used by SQLite's `json_extract` for this column.
    pub fn json_path(&self) -> String {
        json_path(&self.column_id)
    }

    /// Id rules: non-empty, and free of characters that would break a JSON path.
    pub fn check_id(column_id: &str) -> Result<(), String> {
        if column_id.trim().is_empty() {
            return Err("column id must not be empty".to_string());
        }
        if column_id.contains('"') || column_id.contains('\\') {
            return Err(format!("column id '{}' must not contain quotes or backslashes", column_id));
        }
        Ok(())
    }
}

pub fn json_path(column_id: &str) -> String {
    format!("$.\"{}\"", column_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_camel_case_payload() {
        let mut col: Column = serde_json::from_value(json!({
            "columnId": "Total",
            "name": "Total",
            "type": "formula",
            "formulaExpression": "Quantity*Price"
        }))
        .unwrap();
        assert!(!col.is_formula);
        assert!(col.ensure_type_consistency());
        assert!(col.is_formula);
        assert!(!col.ensure_type_consistency());
        assert_eq!(col.formula_expression.as_deref(), Some("Quantity*Price"));
    }

    #[test]
    fn initial_value_prefers_default() {
        let plain = Column::new("Status", ColumnType::Select);
        assert_eq!(plain.initial_value(), Value::Null);
        let with_default = Column::new("Status", ColumnType::Select).with_default(json!("todo"));
        assert_eq!(with_default.initial_value(), json!("todo"));
    }

    #[test]
    fn id_rules() {
        assert!(Column::check_id("Unit Price").is_ok());
        assert!(Column::check_id("").is_err());
        assert!(Column::check_id("a\"b").is_err());
        assert_eq!(json_path("Unit Price"), "$.\"Unit Price\"");
    }
}
