// Change detector abstraction
// Two detection strategies behind one interface: windowed-drop and surge

use serde::{Deserialize, Serialize};

use crate::config::{DaytimeWindow, DetectionConfig};
use crate::events::surge::SurgeDetector;
use crate::events::types::RawDetection;
use crate::events::windowed::WindowedDropDetector;
use crate::series::SmoothedSample;

/// Detection strategy selectable by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStrategy {
    /// Compare ~10-sample averages on either side of each index
    /// Threshold is a percentage of the day's Y-range
    WindowedDrop,

    /// Compare consecutive smoothed values against a small threshold
    /// with an absolute floor
    Surge,
}

impl DetectorStrategy {
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "windowed_drop" | "windowed-drop" | "drop" => Some(DetectorStrategy::WindowedDrop),
            "surge" => Some(DetectorStrategy::Surge),
            _ => None,
        }
    }

    pub fn to_string(&self) -> &'static str {
        match self {
            DetectorStrategy::WindowedDrop => "windowed_drop",
            DetectorStrategy::Surge => "surge",
        }
    }
}

/// How the start of an event is searched for
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Lookback {
    /// Lowest raw value within a fixed number of points before the detection
    Fixed(usize),

    /// Walk back over smoothed values until the valley bottom is passed
    ValleyTrace { max_points: usize },
}

/// Boundary refinement rules published by a detector
/// The resolver follows these without knowing which strategy produced them
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundaryPolicy {
    pub lookback: Lookback,

    /// Points searched after the detection for the event end
    pub lookforward: usize,

    /// Searches stop at timestamp gaps longer than this
    pub max_gap_secs: f64,

    /// Start-hour admissibility window, when the strategy requires one
    pub daytime_filter: Option<DaytimeWindow>,
}

/// Common interface for change detection strategies
pub trait ChangeDetector: Send + Sync {
    /// Strategy identifier for logs and traces
    fn strategy(&self) -> DetectorStrategy;

    /// Minimum change that counts as a detection for a series with this Y-range
    fn threshold(&self, y_range: f64, config: &DetectionConfig) -> f64;

    /// Scan a smoothed series for raw change points
    /// Flat series (zero Y-range) yield no detections
    fn detect(&self, smoothed: &[SmoothedSample], config: &DetectionConfig) -> Vec<RawDetection>;

    /// Boundary refinement rules for events found by this strategy
    fn boundary_policy(&self, config: &DetectionConfig) -> BoundaryPolicy;
}

/// Build the detector for a configured strategy
pub fn detector_for(strategy: DetectorStrategy) -> Box<dyn ChangeDetector> {
    match strategy {
        DetectorStrategy::WindowedDrop => Box::new(WindowedDropDetector),
        DetectorStrategy::Surge => Box::new(SurgeDetector),
    }
}
