// src/blocks/database/reader/rows.rs
// SQL generation for filtered, searched and sorted row reads.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::Value;

use super::super::error::{EngineError, EngineResult, FieldError};
use super::queries::{row_from_sql, ROW_COLUMNS};
use crate::blocks::column_definition::Column;
use crate::blocks::column_type::{AggregationType, ColumnType};
use crate::blocks::definitions::{Aggregation, Block, Filter, FilterOperator, Row, Sort};

/// Converts a JSON value into the SQL value `json_extract` yields for it.
pub(crate) fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// SQL expression reading one column of a `block_rows r` row.
pub(crate) fn value_expr(column: &Column) -> String {
    let source = if column.is_derived() { "r.computed_data" } else { "r.data" };
    format!("json_extract({}, {})", source, sql_literal(&column.json_path()))
}

fn text_expr(column: &Column) -> String {
    format!("lower(CAST({} AS TEXT))", value_expr(column))
}

/// Filter values on numeric columns may arrive as strings.
fn coerce(column: &Column, value: &Value) -> SqlValue {
    if matches!(column.column_type, ColumnType::Number | ColumnType::Currency) {
        if let Some(n) = value.as_str().and_then(|s| s.trim().parse::<f64>().ok()) {
            return if n.fract() == 0.0 && n.abs() < 9.0e15 {
                SqlValue::Integer(n as i64)
            } else {
                SqlValue::Real(n)
            };
        }
    }
    sql_value(value)
}

fn needle(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        Value::Null => String::new(),
        other => other.to_string().to_lowercase(),
    }
}

/// Read-side query over one block's active rows. Filters are ANDed, search is
/// an OR across searchable columns, and ordering always ends on
/// `position, auto_number` so pages are stable.
pub struct RowQuery<'a> {
    block: &'a Block,
    filters: Vec<Filter>,
    sorts: Vec<Sort>,
    search: Option<String>,
}

impl<'a> RowQuery<'a> {
    /// Fails with `Validation` when a filter or sort names an unknown column.
    pub fn new(
        block: &'a Block,
        filters: Vec<Filter>,
        sorts: Vec<Sort>,
        search: Option<String>,
    ) -> EngineResult<Self> {
        let mut errors = Vec::new();
        for filter in &filters {
            if block.column(&filter.column_id).is_none() {
                errors.push(FieldError::new(filter.column_id.clone(), "unknown filter column"));
            }
        }
        for sort in &sorts {
            if block.column(&sort.column_id).is_none() {
                errors.push(FieldError::new(sort.column_id.clone(), "unknown sort column"));
            }
        }
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        let search = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        Ok(Self {
            block,
            filters,
            sorts,
            search,
        })
    }

    fn column(&self, column_id: &str) -> EngineResult<&'a Column> {
        self.block
            .column(column_id)
            .ok_or_else(|| EngineError::validation(column_id, "unknown column"))
    }

    fn filter_clause(&self, filter: &Filter, params: &mut Vec<SqlValue>) -> EngineResult<String> {
        let column = self.column(&filter.column_id)?;
        let expr = value_expr(column);
        let is_list = column.column_type == ColumnType::MultiSelect;
        let clause = match filter.operator {
            FilterOperator::Equals if filter.value.is_null() => format!("{} IS NULL", expr),
            FilterOperator::NotEquals if filter.value.is_null() => format!("{} IS NOT NULL", expr),
            FilterOperator::Equals => {
                params.push(coerce(column, &filter.value));
                format!("{} = ?", expr)
            }
            FilterOperator::NotEquals => {
                params.push(coerce(column, &filter.value));
                format!("({} IS NULL OR {} != ?)", expr, expr)
            }
            FilterOperator::Contains | FilterOperator::NotContains => {
                let needle = needle(&filter.value);
                let positive = if needle.is_empty() {
                    "1".to_string()
                } else if is_list {
                    params.push(SqlValue::Text(needle));
                    format!(
                        "EXISTS (SELECT 1 FROM json_each(r.data, {}) WHERE lower(json_each.value) = ?)",
                        sql_literal(&column.json_path())
                    )
                } else {
                    params.push(SqlValue::Text(needle));
                    format!("instr({}, ?) > 0", text_expr(column))
                };
                if filter.operator == FilterOperator::Contains {
                    positive
                } else {
                    format!("({} IS NULL OR NOT ({}))", expr, positive)
                }
            }
            FilterOperator::StartsWith => {
                let needle = needle(&filter.value);
                if needle.is_empty() {
                    "1".to_string()
                } else {
                    params.push(SqlValue::Text(needle));
                    format!("instr({}, ?) = 1", text_expr(column))
                }
            }
            FilterOperator::EndsWith => {
                let needle = needle(&filter.value);
                if needle.is_empty() {
                    "1".to_string()
                } else {
                    let length = needle.chars().count() as i64;
                    params.push(SqlValue::Text(needle));
                    format!("substr({}, -{}) = ?", text_expr(column), length)
                }
            }
            FilterOperator::GreaterThan
            | FilterOperator::LessThan
            | FilterOperator::GreaterThanOrEqual
            | FilterOperator::LessThanOrEqual => {
                let op = match filter.operator {
                    FilterOperator::GreaterThan => ">",
                    FilterOperator::LessThan => "<",
                    FilterOperator::GreaterThanOrEqual => ">=",
                    _ => "<=",
                };
                params.push(coerce(column, &filter.value));
                format!("({} IS NOT NULL AND {} {} ?)", expr, expr, op)
            }
            FilterOperator::IsEmpty => {
                format!("({e} IS NULL OR {e} = '' OR {e} = '[]')", e = expr)
            }
            FilterOperator::IsNotEmpty => {
                format!("({e} IS NOT NULL AND {e} != '' AND {e} != '[]')", e = expr)
            }
        };
        Ok(clause)
    }

    fn search_clause(&self, term: &str, params: &mut Vec<SqlValue>) -> String {
        let parts: Vec<String> = self
            .block
            .columns
            .iter()
            .filter(|c| c.column_type.is_searchable())
            .map(|c| {
                params.push(SqlValue::Text(term.to_string()));
                format!("instr({}, ?) > 0", text_expr(c))
            })
            .collect();
        if parts.is_empty() {
            "0".to_string()
        } else {
            format!("({})", parts.join(" OR "))
        }
    }

    /// `WHERE` body and its parameters, shared by count, fetch and aggregate.
    fn where_clause(&self) -> EngineResult<(String, Vec<SqlValue>)> {
        let mut params = vec![SqlValue::Text(self.block.id.clone())];
        let mut clauses = vec!["r.block_id = ?".to_string(), "r.deleted_at IS NULL".to_string()];
        for filter in &self.filters {
            clauses.push(self.filter_clause(filter, &mut params)?);
        }
        if let Some(term) = &self.search {
            clauses.push(self.search_clause(term, &mut params));
        }
        Ok((clauses.join(" AND "), params))
    }

    /// Sorts apply in list order; callers arrange priorities beforehand.
    fn order_clause(&self) -> EngineResult<String> {
        let mut terms = Vec::with_capacity(self.sorts.len() + 2);
        for sort in &self.sorts {
            let column = self.column(&sort.column_id)?;
            terms.push(format!("{} {}", value_expr(column), sort.direction.as_sql()));
        }
        terms.push("r.position ASC".to_string());
        terms.push("r.auto_number ASC".to_string());
        Ok(terms.join(", "))
    }

    pub fn count(&self, conn: &Connection) -> EngineResult<u64> {
        let (where_sql, params) = self.where_clause()?;
        let sql = format!("SELECT COUNT(*) FROM block_rows r WHERE {}", where_sql);
        let count: i64 = conn.query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn fetch(&self, conn: &Connection, limit: usize, offset: usize) -> EngineResult<Vec<Row>> {
        let (where_sql, mut params) = self.where_clause()?;
        let sql = format!(
            "SELECT {} FROM block_rows r WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
            ROW_COLUMNS,
            where_sql,
            self.order_clause()?
        );
        params.push(SqlValue::Integer(limit as i64));
        params.push(SqlValue::Integer(offset as i64));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), row_from_sql)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Aggregation over the whole filtered set, or `None` for columns without one.
    pub fn aggregate(&self, conn: &Connection, column: &Column) -> EngineResult<Option<Aggregation>> {
        let Some(kind) = column.column_type.aggregation() else {
            return Ok(None);
        };
        let (where_sql, params) = self.where_clause()?;
        let expr = value_expr(column);
        match kind {
            AggregationType::Numeric => {
                let numeric = format!(
                    "CASE WHEN typeof({e}) IN ('integer', 'real') THEN {e} END",
                    e = expr
                );
                let sql = format!(
                    "SELECT COUNT({n}), TOTAL({n}), AVG({n}), MIN({n}), MAX({n})
                     FROM block_rows r WHERE {w}",
                    n = numeric,
                    w = where_sql
                );
                let aggregation = conn.query_row(&sql, rusqlite::params_from_iter(params), |row| {
                    Ok(Aggregation::Numeric {
                        count: row.get::<_, i64>(0)?.max(0) as u64,
                        sum: row.get(1)?,
                        avg: row.get(2)?,
                        min: row.get(3)?,
                        max: row.get(4)?,
                    })
                })?;
                Ok(Some(aggregation))
            }
            AggregationType::Distribution => {
                let sql = format!(
                    "SELECT CAST({e} AS TEXT) AS v, COUNT(*) FROM block_rows r
                     WHERE {w} AND {e} IS NOT NULL AND {e} != ''
                     GROUP BY v ORDER BY v",
                    e = expr,
                    w = where_sql
                );
                let mut stmt = conn.prepare(&sql)?;
                let pairs = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                let mut values = BTreeMap::new();
                let mut count = 0u64;
                for pair in pairs {
                    let (value, n) = pair?;
                    let n = n.max(0) as u64;
                    count += n;
                    values.insert(value, n);
                }
                Ok(Some(Aggregation::Distribution { count, values }))
            }
        }
    }
}
