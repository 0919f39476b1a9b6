//! SQLite connection handling for the migration ledger.

use std::fs;
use std::path::Path;

use sea_orm::{Database, DatabaseConnection, DbErr};
use tracing::debug;

use crate::errors::LedgerError;

/// Map a filesystem path to a sqlite connection URL, creating parent
/// directories so `mode=rwc` can create the file.
pub fn ledger_url(path: &Path) -> Result<String, LedgerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(format!("sqlite:{}?mode=rwc", path.display()))
}

pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    debug!("Connecting to ledger database: {}", url);
    Database::connect(url).await
}
