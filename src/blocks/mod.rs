// src/blocks/mod.rs
// Database blocks: typed columns, versioned rows, derived values, cached queries.

pub mod cache;
pub mod column_definition;
pub mod column_type;
pub mod database;
pub mod definitions;
pub mod dependency;
pub mod engine;
pub mod formula;
pub mod materialize;
pub mod schema_registry;

pub use column_definition::Column;
pub use column_type::{AggregationType, ColumnType};
pub use database::{Database, EngineError, EngineResult, FieldError, StoreConfig};
pub use definitions::*;
pub use engine::BlockEngine;
pub use formula::{ArithmeticEvaluator, EvalError, FormulaEvaluator, RowContext};
