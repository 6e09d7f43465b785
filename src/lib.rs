// src/lib.rs
pub mod blocks;
pub mod cli;
pub mod settings;

pub use blocks::{BlockEngine, Column, ColumnType, EngineError, EngineResult};
pub use settings::EngineSettings;
