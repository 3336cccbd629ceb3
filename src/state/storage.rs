// File system locations for persisted calibration and trace data
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to get app data directory")]
    NoAppDataDir,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Directory name under the platform data dir
pub const APP_DIR_NAME: &str = "slabwatch";

/// Get the app data directory for slabwatch
pub fn get_app_data_dir() -> StorageResult<PathBuf> {
    let data_dir = dirs::data_dir().ok_or(StorageError::NoAppDataDir)?;
    ensure_dir(&data_dir.join(APP_DIR_NAME))
}

/// Get the calibration log directory
pub fn get_calibration_dir() -> StorageResult<PathBuf> {
    ensure_dir(&get_app_data_dir()?.join("calibration"))
}

/// Get the directory that holds per-batch trace files
pub fn get_trace_dir() -> StorageResult<PathBuf> {
    ensure_dir(&get_app_data_dir()?.join("traces"))
}

/// Resolve a configured directory, falling back to the default one
pub fn resolve_dir(
    configured: Option<&Path>,
    fallback: fn() -> StorageResult<PathBuf>,
) -> StorageResult<PathBuf> {
    match configured {
        Some(dir) => ensure_dir(dir),
        None => fallback(),
    }
}

fn ensure_dir(dir: &Path) -> StorageResult<PathBuf> {
    fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}

/// Read a file from disk
pub fn read_file(path: &Path) -> StorageResult<Vec<u8>> {
    Ok(fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_configured_dir_is_created() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("a").join("b");

        let resolved = resolve_dir(Some(&target), get_trace_dir).unwrap();
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }

    #[test]
    fn test_read_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let result = read_file(&temp_dir.path().join("missing.json"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }
}
