// Calibration module
// Learns additive click offsets from human corrections of detected points

pub mod profile;
pub mod store;

pub use profile::{apply_offset, CalibrationProfile, CalibrationRecord, ConfidenceTier, Offset};
pub use store::{read_records, CalibrationError, CalibrationStore, CALIBRATION_FILE};
