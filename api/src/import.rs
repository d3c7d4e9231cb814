use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use crate::aggregate::{self, HistorySummary};
use crate::{db, filter, loader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub user_id: i64,
    pub raw_records: usize,
    pub kept_records: usize,
    pub stored_records: u64,
}

/// Load, filter and append a directory of exports to a user's history.
pub async fn import_directory(
    pool: &SqlitePool,
    username: &str,
    dir: impl AsRef<Path>,
) -> Result<ImportReport> {
    let dir = dir.as_ref();
    tracing::info!("importing {} for user '{}'", dir.display(), username);

    let raw = loader::load_history_dir(dir).await?;
    let raw_records = raw.len();
    let plays = filter::filter_history(raw)?;
    tracing::info!(
        "kept {} of {} records after filtering",
        plays.len(),
        raw_records
    );

    let report = db::store_history(pool, username, &plays).await?;

    Ok(ImportReport {
        user_id: report.user_id,
        raw_records,
        kept_records: plays.len(),
        stored_records: report.inserted,
    })
}

/// Aggregate a directory of exports without touching the database.
pub async fn summarize_directory(dir: impl AsRef<Path>, username: &str) -> Result<HistorySummary> {
    let raw = loader::load_history_dir(dir).await?;
    let plays = filter::filter_history(raw)?;
    Ok(aggregate::summarize(&plays, username))
}
