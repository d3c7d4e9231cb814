use std::path::PathBuf;

/// Failures the pipeline reports explicitly. Everything else travels as
/// `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),
}
