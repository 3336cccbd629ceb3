// High-sensitivity surge detection
// Flags consecutive smoothed steps above a relative threshold with an absolute floor

use crate::config::DetectionConfig;
use crate::events::backend::{BoundaryPolicy, ChangeDetector, DetectorStrategy, Lookback};
use crate::events::types::{Direction, RawDetection};
use crate::series::{value_range, SmoothedSample};

/// Surge detector
///
/// Threshold is `max(surge_abs_floor, y_range * surge_rel_factor)`, so days
/// with a tiny total range still get a usable minimum sensitivity. Detections
/// use the opposite sign convention to windowed-drop: magnitude is
/// `previous - current`, negative for an upward surge, labelled `Drop`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurgeDetector;

impl ChangeDetector for SurgeDetector {
    fn strategy(&self) -> DetectorStrategy {
        DetectorStrategy::Surge
    }

    fn threshold(&self, y_range: f64, config: &DetectionConfig) -> f64 {
        config.surge_abs_floor.max(y_range * config.surge_rel_factor)
    }

    fn detect(&self, smoothed: &[SmoothedSample], config: &DetectionConfig) -> Vec<RawDetection> {
        let y_range = value_range(smoothed);
        if y_range <= 0.0 {
            return Vec::new();
        }

        let threshold = self.threshold(y_range, config);

        let detections: Vec<RawDetection> = smoothed
            .windows(2)
            .enumerate()
            .filter_map(|(i, pair)| {
                let step = pair[1].value - pair[0].value;
                (step >= threshold)
                    .then(|| RawDetection::new(i + 1, pair[0].value - pair[1].value, Direction::Drop))
            })
            .collect();

        log::debug!(
            "surge: {} raw detections (range {:.3}, threshold {:.4})",
            detections.len(),
            y_range,
            threshold
        );

        detections
    }

    fn boundary_policy(&self, config: &DetectionConfig) -> BoundaryPolicy {
        BoundaryPolicy {
            lookback: Lookback::ValleyTrace {
                max_points: config.surge_trace_back,
            },
            lookforward: config.lookforward,
            max_gap_secs: config.max_gap_secs,
            daytime_filter: Some(config.daytime),
        }
    }
}
