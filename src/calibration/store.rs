// Calibration store
// Append-only JSONL log of human corrections, shared across runs and processes

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::calibration::profile::{CalibrationProfile, CalibrationRecord};
use crate::chart::PointPair;
use crate::state::storage::{get_calibration_dir, StorageError};

/// File name of the correction log inside the calibration directory
pub const CALIBRATION_FILE: &str = "corrections.jsonl";

/// Errors that can occur during calibration store operations
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Corrupt calibration store at line {line}: {source}")]
    CorruptStore {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Process-wide calibration log
///
/// Appends are serialized in-process by a mutex and across processes by an
/// exclusive file lock. Readers take a shared lock and always parse the whole
/// log, so the profile is never a stale snapshot.
pub struct CalibrationStore {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl CalibrationStore {
    /// Open a store backed by a specific file
    /// The file is created on the first append
    pub fn new(path: PathBuf) -> Self {
        CalibrationStore {
            path,
            write_guard: Mutex::new(()),
        }
    }

    /// Open the store in the per-user data directory
    pub fn open_default() -> Result<Self, CalibrationError> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn default_path() -> Result<PathBuf, CalibrationError> {
        Ok(get_calibration_dir()?.join(CALIBRATION_FILE))
    }

    /// Get the log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a correction and flush it to disk
    pub fn record_correction(
        &self,
        subject_id: &str,
        detected: PointPair,
        corrected: PointPair,
    ) -> Result<CalibrationRecord, CalibrationError> {
        let record = CalibrationRecord::new(subject_id, detected, corrected);
        self.append(&record)?;

        log::info!(
            "Recorded calibration correction for {} (start Δ {:.1},{:.1}; end Δ {:.1},{:.1})",
            subject_id,
            record.start_delta().dx,
            record.start_delta().dy,
            record.end_delta().dx,
            record.end_delta().dy
        );

        Ok(record)
    }

    /// Append an already-built record
    pub fn append(&self, record: &CalibrationRecord) -> Result<(), CalibrationError> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        FileExt::lock_exclusive(&file)?;
        let written = file.write_all(line.as_bytes()).and_then(|_| file.sync_data());
        FileExt::unlock(&file)?;
        written?;

        Ok(())
    }

    /// All records in the log, failing on any malformed line
    pub fn records(&self) -> Result<Vec<CalibrationRecord>, CalibrationError> {
        read_records(&self.path)
    }

    /// Profile recomputed from the full log
    pub fn try_profile(&self) -> Result<CalibrationProfile, CalibrationError> {
        Ok(CalibrationProfile::from_records(&self.records()?))
    }

    /// Profile recomputed from the full log
    /// An unreadable or corrupt log degrades to the empty profile
    pub fn profile(&self) -> CalibrationProfile {
        match self.try_profile() {
            Ok(profile) => profile,
            Err(e) => {
                log::warn!(
                    "Calibration store {} unusable, continuing without offsets: {}",
                    self.path.display(),
                    e
                );
                CalibrationProfile::empty()
            }
        }
    }
}

/// Read calibration records from a JSONL file
/// A missing file is an empty log
pub fn read_records(path: &Path) -> Result<Vec<CalibrationRecord>, CalibrationError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    FileExt::lock_shared(&file)?;
    let mut contents = String::new();
    let read = file.read_to_string(&mut contents);
    FileExt::unlock(&file)?;
    read?;

    let mut records = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let record: CalibrationRecord = serde_json::from_str(line)
            .map_err(|source| CalibrationError::CorruptStore { line: i + 1, source })?;
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::profile::{ConfidenceTier, Offset};
    use crate::chart::ScreenPoint;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn pair(sx: f64, sy: f64, ex: f64, ey: f64) -> PointPair {
        PointPair::new(ScreenPoint::new(sx, sy), ScreenPoint::new(ex, ey))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(temp_dir.path().join("none.jsonl"));

        assert!(store.records().unwrap().is_empty());
        assert_eq!(store.profile().confidence_tier, ConfidenceTier::None);
    }

    #[test]
    fn test_record_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("corrections.jsonl");
        let store = CalibrationStore::new(path.clone());

        store
            .record_correction("farm-a", pair(10.0, 10.0, 50.0, 50.0), pair(12.0, 9.0, 50.0, 54.0))
            .unwrap();

        let profile = store.profile();
        assert_eq!(profile.sample_count, 1);
        assert_eq!(profile.confidence_tier, ConfidenceTier::Early);
        assert_eq!(profile.mean_offset_start, Offset::new(2.0, -1.0));
        assert_eq!(profile.mean_offset_end, Offset::new(0.0, 4.0));

        // A second store over the same file sees the same log
        let reopened = CalibrationStore::new(path);
        assert_eq!(reopened.records().unwrap()[0].subject_id, "farm-a");
    }

    #[test]
    fn test_tier_progression() {
        let temp_dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(temp_dir.path().join("c.jsonl"));

        for i in 0..20 {
            store
                .record_correction(&format!("farm-{}", i), pair(0.0, 0.0, 0.0, 0.0), pair(1.0, 1.0, 1.0, 1.0))
                .unwrap();
            let expected = ConfidenceTier::from_count(i + 1);
            assert_eq!(store.profile().confidence_tier, expected);
        }
        assert_eq!(store.profile().confidence_tier, ConfidenceTier::Trained);
    }

    #[test]
    fn test_corrupt_store_degrades_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("c.jsonl");
        let store = CalibrationStore::new(path.clone());

        store
            .record_correction("farm-a", pair(0.0, 0.0, 0.0, 0.0), pair(1.0, 1.0, 1.0, 1.0))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{not json\n").unwrap();

        assert!(matches!(
            store.try_profile(),
            Err(CalibrationError::CorruptStore { line: 2, .. })
        ));
        let profile = store.profile();
        assert_eq!(profile.confidence_tier, ConfidenceTier::None);
        assert_eq!(profile.mean_offset_start, Offset::default());
    }

    #[test]
    fn test_blank_lines_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("c.jsonl");
        let store = CalibrationStore::new(path.clone());

        store
            .record_correction("farm-a", pair(0.0, 0.0, 0.0, 0.0), pair(1.0, 1.0, 1.0, 1.0))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"\n\n").unwrap();

        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_appends_all_land() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(CalibrationStore::new(temp_dir.path().join("c.jsonl")));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..5 {
                        store
                            .record_correction(
                                &format!("farm-{}-{}", t, i),
                                pair(0.0, 0.0, 0.0, 0.0),
                                pair(2.0, 2.0, 2.0, 2.0),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let profile = store.profile();
        assert_eq!(profile.sample_count, 20);
        assert_eq!(profile.mean_offset_end, Offset::new(2.0, 2.0));
    }
}
