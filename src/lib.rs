// slabwatch - Irrigation event detection and calibration
// Module declarations

pub mod calibration;
pub mod chart;
pub mod config;
pub mod confirm;
pub mod events;
pub mod pipeline;
pub mod series;
pub mod state;

pub use calibration::{CalibrationProfile, CalibrationStore, ConfidenceTier};
pub use chart::{ChartGeometry, PointPair, ScreenPoint};
pub use config::AppConfig;
pub use confirm::{ConfirmMode, ConfirmationSignal};
pub use events::{detect_day, DetectionOutcome, DetectorStrategy};
pub use pipeline::{Pipeline, SubjectInput, SubjectOutcome};
pub use series::{parse_node_report, Sample};
