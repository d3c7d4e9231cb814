use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::error::HistoryError;
use crate::models::RawStreamRecord;

/// Read every `.json` export in `dir` (non-recursive) into one record set.
///
/// Files are visited in name order so repeated runs see the same row order.
pub async fn load_history_dir(dir: impl AsRef<Path>) -> Result<Vec<RawStreamRecord>> {
    let dir = dir.as_ref();
    let exists = tokio::fs::try_exists(dir)
        .await
        .with_context(|| format!("failed to check {}", dir.display()))?;
    if !exists {
        return Err(HistoryError::DirectoryNotFound(dir.to_path_buf()).into());
    }

    let files = list_json_files(dir).await?;
    if files.is_empty() {
        tracing::warn!("no .json files found in {}", dir.display());
    }

    let mut records = Vec::new();
    for file in files {
        let batch = load_history_file(&file).await?;
        tracing::debug!("read {} records from {}", batch.len(), file.display());
        records.extend(batch);
    }

    tracing::info!("loaded {} raw records from {}", records.len(), dir.display());
    Ok(records)
}

async fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to list {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_json = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(".json"));
        if is_json && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Parse a single export file, which holds a JSON array of records.
pub async fn load_history_file(path: &Path) -> Result<Vec<RawStreamRecord>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    serde_json::from_slice(&bytes).with_context(|| format!("failed to parse {}", path.display()))
}
