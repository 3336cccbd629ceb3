// Pipeline run tracing
// Append-only JSONL record of per-subject stage progress

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during trace operations
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Processing stage of one subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Detect,
    Map,
    Calibrate,
    Confirm,
    Click,
    Record,
}

impl Stage {
    pub fn to_string(&self) -> String {
        match self {
            Stage::Ingest => "ingest".to_string(),
            Stage::Detect => "detect".to_string(),
            Stage::Map => "map".to_string(),
            Stage::Calibrate => "calibrate".to_string(),
            Stage::Confirm => "confirm".to_string(),
            Stage::Click => "click".to_string(),
            Stage::Record => "record".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Completed,
    Failed,
}

/// A single entry in the run trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,

    /// Farm / node identifier being processed
    pub subject_id: String,

    pub stage: Stage,

    pub status: StageStatus,

    pub message: String,

    /// Structured detail (event indices, resolution, error text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    pub fn new(subject_id: impl Into<String>, stage: Stage, status: StageStatus, message: impl Into<String>) -> Self {
        TraceEntry {
            timestamp: Utc::now(),
            subject_id: subject_id.into(),
            stage,
            status,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Run trace writer
/// Appends to a JSONL file, creating it on first write
pub struct TraceWriter {
    file_path: PathBuf,
}

impl TraceWriter {
    pub fn new(file_path: PathBuf) -> Self {
        TraceWriter { file_path }
    }

    /// Writer for a new file named after the run start time
    pub fn for_run(dir: &Path) -> Self {
        let name = format!("run-{}.jsonl", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"));
        Self::new(dir.join(name))
    }

    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        file.write_all(entry.to_json_line()?.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Get the trace file path
    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Builds entries for one subject and stage
pub struct TraceBuilder {
    subject_id: String,
    stage: Stage,
}

impl TraceBuilder {
    pub fn new(subject_id: impl Into<String>, stage: Stage) -> Self {
        TraceBuilder {
            subject_id: subject_id.into(),
            stage,
        }
    }

    pub fn started(&self, message: impl Into<String>) -> TraceEntry {
        TraceEntry::new(self.subject_id.clone(), self.stage, StageStatus::Started, message)
    }

    pub fn completed(&self, message: impl Into<String>) -> TraceEntry {
        TraceEntry::new(self.subject_id.clone(), self.stage, StageStatus::Completed, message)
    }

    pub fn failed(&self, message: impl Into<String>) -> TraceEntry {
        TraceEntry::new(self.subject_id.clone(), self.stage, StageStatus::Failed, message)
    }
}

/// Read trace entries from a JSONL file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(line)?);
    }

    Ok(entries)
}
