// src/cli/init.rs
use std::path::Path;

use super::CliError;
use crate::blocks::BlockEngine;
use crate::settings::io::{get_config_path, save_settings_to};
use crate::settings::EngineSettings;

pub fn run(settings: &EngineSettings, config: Option<&Path>, write_config: bool) -> Result<(), CliError> {
    let store = settings.store_config();
    let engine = BlockEngine::open(settings.clone())?;
    let blocks = engine.list_blocks()?;
    println!("Database ready: {}", store.db_path.display());
    println!("  {} block(s)", blocks.len());

    if write_config {
        let path = match config {
            Some(p) => p.to_path_buf(),
            None => get_config_path()?,
        };
        save_settings_to(&path, settings)?;
        println!("Settings written to {}", path.display());
    }
    Ok(())
}
