// src/blocks/database/error.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One violated field reported by row validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub column_id: String,
    pub message: String,
}

impl FieldError {
    pub fn new(column_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            column_id: column_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.column_id, self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),

    #[error("version conflict on row {row_id}: expected {expected}, found {actual}")]
    Conflict {
        row_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("formula dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("SQLite error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(column_id: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation(vec![FieldError::new(column_id, message)])
    }

    /// Errors caused by a single row's input or state. Bulk operations record
    /// these per row instead of failing the whole batch.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::Conflict { .. } | EngineError::NotFound(_)
        )
    }

    /// True when the caller should reread the row and retry with its fresh version.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }

    /// SQLite reported the database busy or locked; safe to retry the whole operation.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            EngineError::Validation(errors) => errors,
            _ => &[],
        }
    }
}
