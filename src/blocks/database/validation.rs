// src/blocks/database/validation.rs
// Row validation before writes, and integrity checks over stored rows.

use rusqlite::Connection;
use tracing::{info, warn};

use super::error::{EngineError, EngineResult, FieldError};
use super::reader::{self, count_active_rows};
use crate::blocks::column_type::is_empty_value;
use crate::blocks::definitions::{Block, RowData};

/// Keys a client may not send: unknown columns, derived columns and system columns.
pub fn check_input_keys(block: &Block, input: &RowData) -> Vec<FieldError> {
    let mut errors = Vec::new();
    for key in input.keys() {
        match block.column(key) {
            None => errors.push(FieldError::new(key.clone(), "unknown column")),
            Some(column) if !column.column_type.is_writable() => {
                let message = if column.is_derived() {
                    "derived column is read-only"
                } else {
                    "system column is read-only"
                };
                errors.push(FieldError::new(key.clone(), message));
            }
            Some(_) => {}
        }
    }
    errors
}

/// Checks a complete row `data` map: required, type and unique rules.
/// `row_id` excludes the row itself from the unique check.
pub fn check_row_data(
    conn: &Connection,
    block: &Block,
    data: &RowData,
    row_id: Option<&str>,
) -> EngineResult<Vec<FieldError>> {
    let mut errors = Vec::new();
    for column in block.columns.iter().filter(|c| !c.is_derived()) {
        let value = data.get(&column.column_id);
        let empty = value.map(is_empty_value).unwrap_or(true);
        if column.is_required && empty {
            errors.push(FieldError::new(column.column_id.clone(), "is required"));
            continue;
        }
        let Some(value) = value else { continue };
        if let Err(message) = column.column_type.check_value(value, &column.options) {
            errors.push(FieldError::new(column.column_id.clone(), message));
            continue;
        }
        if column.is_unique && !empty {
            if let Some(other) = reader::find_duplicate(conn, &block.id, column, value, row_id)? {
                errors.push(FieldError::new(
                    column.column_id.clone(),
                    format!("value {} already used by row {}", value, other),
                ));
            }
        }
    }
    Ok(errors)
}

/// Full write validation: input keys first, then the merged row.
pub fn validate_row(
    conn: &Connection,
    block: &Block,
    input: &RowData,
    merged: &RowData,
    row_id: Option<&str>,
) -> EngineResult<()> {
    let mut errors = check_input_keys(block, input);
    errors.extend(check_row_data(conn, block, merged, row_id)?);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(errors))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RowIssue {
    pub row_id: String,
    pub issue: String,
}

/// Result of `check_block`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IntegrityReport {
    pub block_id: String,
    pub rows_checked: usize,
    pub stored_row_count: i64,
    pub actual_row_count: i64,
    pub issues: Vec<RowIssue>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty() && self.stored_row_count == self.actual_row_count
    }

    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!("ok '{}': {} active rows", self.block_id, self.actual_row_count)
        } else {
            let mut parts = Vec::new();
            if self.stored_row_count != self.actual_row_count {
                parts.push(format!(
                    "row_count {} but {} active rows",
                    self.stored_row_count, self.actual_row_count
                ));
            }
            if !self.issues.is_empty() {
                parts.push(format!("{} row issues", self.issues.len()));
            }
            format!("issues in '{}': {}", self.block_id, parts.join(", "))
        }
    }

    pub fn log(&self) {
        if self.is_valid() {
            info!("{}", self.summary());
        } else {
            warn!("{}", self.summary());
            for issue in self.issues.iter().take(20) {
                warn!("  row {}: {}", issue.row_id, issue.issue);
            }
        }
    }
}

/// Scans every active row of a block for violations of the storage invariants.
pub fn check_block(conn: &Connection, block: &Block) -> EngineResult<IntegrityReport> {
    let ids = reader::active_row_ids(conn, &block.id)?;
    let rows = reader::DbReader::read_active_rows(conn, &ids)?;
    let mut issues = Vec::new();
    for row in &rows {
        for key in row.data.keys() {
            match block.column(key) {
                Some(c) if c.is_derived() => issues.push(RowIssue {
                    row_id: row.id.clone(),
                    issue: format!("derived column '{}' stored in data", key),
                }),
                None => issues.push(RowIssue {
                    row_id: row.id.clone(),
                    issue: format!("data holds unknown column '{}'", key),
                }),
                Some(_) => {}
            }
        }
        for key in row.computed_data.keys() {
            if !block.column(key).is_some_and(|c| c.is_derived()) {
                issues.push(RowIssue {
                    row_id: row.id.clone(),
                    issue: format!("computed data holds non-derived key '{}'", key),
                });
            }
        }
        if row.version < 1 {
            issues.push(RowIssue {
                row_id: row.id.clone(),
                issue: format!("version {} is below 1", row.version),
            });
        }
    }
    Ok(IntegrityReport {
        block_id: block.id.clone(),
        rows_checked: rows.len(),
        stored_row_count: block.row_count,
        actual_row_count: count_active_rows(conn, &block.id)?,
        issues,
    })
}
