//! Server and database commands: `sprintboard serve`, `sprintboard init`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sprintboard::board::db::BoardDb;
use sprintboard::board::server::{self, ServerConfig};
use sprintboard::config::BoardConfig;

/// CLI flags that win over the file and environment.
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub db_path: Option<PathBuf>,
    pub dev: bool,
}

pub async fn cmd_serve(config_path: &Path, overrides: ServeOverrides) -> Result<()> {
    let board = BoardConfig::resolve(config_path)?;
    for warning in board.validate() {
        tracing::warn!("{}", warning);
    }

    let mut config = ServerConfig::from(&board);
    if let Some(port) = overrides.port {
        config.port = port;
    }
    if let Some(host) = overrides.host {
        config.host = host;
    }
    if let Some(db_path) = overrides.db_path {
        config.db_path = db_path;
    }
    config.dev_mode = overrides.dev;

    server::start_server(config).await
}

pub fn cmd_init(config_path: &Path, db_path: Option<PathBuf>) -> Result<()> {
    let db_path = match db_path {
        Some(path) => path,
        None => BoardConfig::resolve(config_path)?.database.path,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = BoardDb::new(&db_path)?;
    println!("Board database initialized at {}", db_path.display());
    for (table, count) in db.table_counts()? {
        println!("  {:<14} {}", table, count);
    }
    Ok(())
}
