// Sensor series types
// Raw samples as delivered by ingestion and their smoothed counterparts

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while preparing a series for detection
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("Insufficient data: need at least {required} samples, got {actual}")]
    InsufficientData { required: usize, actual: usize },
}

/// A single sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Position in the ordered series (unique, increasing)
    pub index: usize,

    /// Seconds since the Unix epoch
    /// Monotonic non-decreasing; gaps are allowed
    pub timestamp: f64,

    /// Slab weight or moisture reading
    pub value: f64,
}

impl Sample {
    pub fn new(index: usize, timestamp: f64, value: f64) -> Self {
        Sample {
            index,
            timestamp,
            value,
        }
    }
}

/// A sample whose value has been replaced by a centered moving average
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedSample {
    pub index: usize,
    pub timestamp: f64,
    pub value: f64,
}

/// Build a series from plain values with a fixed sampling interval
/// Handy for callers that only have evenly spaced readings
pub fn samples_from_values(values: &[f64], start_timestamp: f64, step_secs: f64) -> Vec<Sample> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| Sample::new(i, start_timestamp + i as f64 * step_secs, value))
        .collect()
}

/// Observed Y-range of a smoothed series (max - min)
/// Returns 0.0 for an empty series
pub fn value_range(series: &[SmoothedSample]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }

    let (min, max) = series
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s.value), hi.max(s.value))
        });

    max - min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_from_values() {
        let samples = samples_from_values(&[1.0, 2.0, 3.0], 100.0, 60.0);

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].timestamp, 100.0);
        assert_eq!(samples[2].timestamp, 220.0);
        assert_eq!(samples[2].index, 2);
    }

    #[test]
    fn test_value_range() {
        let series = vec![
            SmoothedSample { index: 0, timestamp: 0.0, value: 4.0 },
            SmoothedSample { index: 1, timestamp: 1.0, value: -1.0 },
            SmoothedSample { index: 2, timestamp: 2.0, value: 2.5 },
        ];

        assert_eq!(value_range(&series), 5.0);
        assert_eq!(value_range(&[]), 0.0);
    }
}
