// src/cli/mod.rs
// Command-line tools for inspecting and exercising a block database

pub mod check_blocks;
pub mod demo;
pub mod init;
pub mod list_blocks;
pub mod query_rows;

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::blocks::{BlockEngine, EngineError};
use crate::settings::{io::load_settings, EngineSettings, SettingsError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("could not encode output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("{0} block(s) failed the integrity check")]
    IntegrityFailed(usize),
}

#[derive(Parser)]
#[command(name = "blockdb")]
#[command(about = "BlockDB - tabular data engine for database blocks", long_about = None)]
pub struct Cli {
    /// Database file (defaults to the configured path, then Documents/BlockDB/blocks.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Settings file (defaults to engine_settings.json in the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database file and tables
    Init {
        /// Also write the effective settings to the settings file
        #[arg(long)]
        write_config: bool,
    },

    /// List blocks with their columns and row counts
    Blocks,

    /// Check stored rows against the block schemas
    Check {
        /// Only check this block
        block_id: Option<String>,
    },

    /// Query rows of a block and print the result as JSON
    Query {
        block_id: String,

        /// Filter as column:operator:value, e.g. Quantity:greater_than:3
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Sort as column or column:desc
        #[arg(long = "sort")]
        sorts: Vec<String>,

        #[arg(long)]
        search: Option<String>,

        #[arg(long)]
        view: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Include numeric and distribution aggregations
        #[arg(long)]
        aggregations: bool,
    },

    /// Create a sample block, write some rows and query them back
    Demo {
        #[arg(long, default_value_t = 25)]
        rows: usize,

        /// Actor recorded on the rows (defaults to the current user)
        #[arg(long)]
        actor: Option<String>,
    },
}

pub fn run(cli: Cli) -> Result<(), CliError> {
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = Some(db);
    }
    debug!("Effective settings: {:?}", settings);

    match cli.command {
        Commands::Init { write_config } => init::run(&settings, cli.config.as_deref(), write_config),
        Commands::Blocks => list_blocks::run(&open(&settings)?),
        Commands::Check { block_id } => check_blocks::run(&open(&settings)?, block_id.as_deref()),
        Commands::Query {
            block_id,
            filters,
            sorts,
            search,
            view,
            limit,
            offset,
            aggregations,
        } => {
            let engine = open(&settings)?;
            let request = query_rows::build_request(
                &block_id,
                &filters,
                &sorts,
                search,
                view,
                limit.unwrap_or(settings.default_query_limit),
                offset,
                aggregations,
            )?;
            query_rows::run(&engine, &request)
        }
        Commands::Demo { rows, actor } => {
            let actor = actor.unwrap_or_else(whoami::username);
            demo::run(&open(&settings)?, rows, &actor)
        }
    }
}

fn open(settings: &EngineSettings) -> Result<BlockEngine, CliError> {
    Ok(BlockEngine::open(settings.clone())?)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
