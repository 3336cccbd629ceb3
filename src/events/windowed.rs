// Windowed-drop change detection
// Flags indices where the average ahead exceeds the average behind by a share of the day's range

use crate::config::DetectionConfig;
use crate::events::backend::{BoundaryPolicy, ChangeDetector, DetectorStrategy, Lookback};
use crate::events::types::{Direction, RawDetection};
use crate::series::{value_range, SmoothedSample};

/// Windowed-drop detector
///
/// For each index `i` the trailing average covers up to `edge_window` smoothed
/// values before `i`; the leading average covers up to `edge_window` values
/// starting at `i`. A detection is recorded when the leading average exceeds
/// the trailing one by at least `threshold_pct` percent of the Y-range.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedDropDetector;

impl ChangeDetector for WindowedDropDetector {
    fn strategy(&self) -> DetectorStrategy {
        DetectorStrategy::WindowedDrop
    }

    fn threshold(&self, y_range: f64, config: &DetectionConfig) -> f64 {
        y_range * config.threshold_pct / 100.0
    }

    fn detect(&self, smoothed: &[SmoothedSample], config: &DetectionConfig) -> Vec<RawDetection> {
        let y_range = value_range(smoothed);
        if y_range <= 0.0 || smoothed.len() < 2 {
            return Vec::new();
        }

        let threshold = self.threshold(y_range, config);
        let n = smoothed.len();
        let w = config.edge_window.max(1);

        let mut prefix = Vec::with_capacity(n + 1);
        prefix.push(0.0);
        for s in smoothed {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + s.value);
        }
        let mean = |lo: usize, hi: usize| (prefix[hi] - prefix[lo]) / (hi - lo) as f64;

        let mut detections = Vec::new();
        for i in 1..n {
            let trailing = mean(i.saturating_sub(w), i);
            let leading = mean(i, (i + w).min(n));
            let magnitude = leading - trailing;

            if magnitude >= threshold {
                detections.push(RawDetection::new(i, magnitude, Direction::Rise));
            }
        }

        log::debug!(
            "windowed-drop: {} raw detections (range {:.3}, threshold {:.3})",
            detections.len(),
            y_range,
            threshold
        );

        detections
    }

    fn boundary_policy(&self, config: &DetectionConfig) -> BoundaryPolicy {
        BoundaryPolicy {
            lookback: Lookback::Fixed(config.drop_lookback),
            lookforward: config.lookforward,
            max_gap_secs: config.max_gap_secs,
            daytime_filter: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{samples_from_values, smooth};

    fn smoothed(values: &[f64]) -> Vec<SmoothedSample> {
        let samples = samples_from_values(values, 0.0, 60.0);
        smooth(&samples, 3).unwrap()
    }

    #[test]
    fn test_threshold_is_percent_of_range() {
        let config = DetectionConfig::default();
        assert!((WindowedDropDetector.threshold(10.0, &config) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_step_peaks_at_boundary() {
        let config = DetectionConfig::default();
        let series = smoothed(&[10.0, 10.0, 10.0, 10.0, 10.0, 20.0, 20.0, 20.0, 20.0, 20.0]);

        let detections = WindowedDropDetector.detect(&series, &config);
        assert!(!detections.is_empty());
        assert!(detections.iter().all(|d| d.direction == Direction::Rise));
        assert!(detections.iter().all(|d| d.magnitude > 0.0));

        let strongest = detections
            .iter()
            .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
            .unwrap();
        assert_eq!(strongest.index, 5);
    }

    #[test]
    fn test_falling_series_not_flagged() {
        let config = DetectionConfig::default();
        let series = smoothed(&[20.0, 20.0, 20.0, 20.0, 20.0, 10.0, 10.0, 10.0, 10.0, 10.0]);

        assert!(WindowedDropDetector.detect(&series, &config).is_empty());
    }

    #[test]
    fn test_flat_series() {
        let config = DetectionConfig::default();
        let series = smoothed(&[3.0; 25]);
        assert!(WindowedDropDetector.detect(&series, &config).is_empty());
    }

    #[test]
    fn test_small_noise_below_threshold() {
        let config = DetectionConfig::default();
        // One real step of 10 plus jitter of 0.1
        let values: Vec<f64> = (0..60)
            .map(|i| {
                let base = if i < 30 { 10.0 } else { 20.0 };
                base + if i % 2 == 0 { 0.05 } else { -0.05 }
            })
            .collect();
        let series = smoothed(&values);

        let detections = WindowedDropDetector.detect(&series, &config);
        // Everything flagged sits around the real step
        assert!(detections.iter().all(|d| d.index > 15 && d.index < 45));
    }
}
