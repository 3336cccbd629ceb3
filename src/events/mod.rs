// Event detection module
// Change detection strategies, event resolution and day selection

pub mod backend;
pub mod detection;
pub mod explainability;
pub mod resolver;
pub mod surge;
pub mod types;
pub mod windowed;

pub use backend::{detector_for, BoundaryPolicy, ChangeDetector, DetectorStrategy, Lookback};
pub use detection::{detect_day, DetectionOutcome, DetectionSummary};
pub use explainability::{clock_time, EventDecision};
pub use resolver::{deduplicate, local_hour, resolve, GroupedDetection, ResolveOutcome, ResolveStats};
pub use surge::SurgeDetector;
pub use types::{DaySelection, Direction, IrrigationEvent, RawDetection};
pub use windowed::WindowedDropDetector;
