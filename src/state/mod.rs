// State management module
// Handles file system locations for persisted data

pub mod storage;

pub use storage::{
    get_app_data_dir, get_calibration_dir, get_trace_dir, read_file, resolve_dir, StorageError,
    StorageResult,
};
