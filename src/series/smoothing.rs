// Series preprocessing
// Centered moving average that suppresses sensor noise without dropping samples

use crate::series::types::{Sample, SeriesError, SmoothedSample};

/// Default half-width of the smoothing window
pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;

/// Minimum number of samples needed for smoothing and detection
pub const MIN_SAMPLES: usize = 2;

/// Smooth a series with a centered moving average
///
/// Each output value is the mean of up to `window` samples on each side of the
/// input sample. The window is clipped at the sequence boundaries, so the first
/// and last samples average over fewer neighbours instead of being dropped.
/// Output length always equals input length.
pub fn smooth(samples: &[Sample], window: usize) -> Result<Vec<SmoothedSample>, SeriesError> {
    if samples.len() < MIN_SAMPLES {
        return Err(SeriesError::InsufficientData {
            required: MIN_SAMPLES,
            actual: samples.len(),
        });
    }

    // Prefix sums keep this linear in the series length
    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0.0);
    for s in samples {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + s.value);
    }

    let n = samples.len();
    let smoothed = samples
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let lo = i.saturating_sub(window);
            let hi = (i + window + 1).min(n);
            let mean = (prefix[hi] - prefix[lo]) / (hi - lo) as f64;
            SmoothedSample {
                index: s.index,
                timestamp: s.timestamp,
                value: mean,
            }
        })
        .collect();

    Ok(smoothed)
}
