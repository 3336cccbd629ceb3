// Day detection
// Runs smoothing, change detection and resolution for one subject's series

use serde::Serialize;

use crate::config::DetectionConfig;
use crate::events::backend::{detector_for, DetectorStrategy};
use crate::events::resolver::{resolve, ResolveStats};
use crate::events::types::{DaySelection, IrrigationEvent};
use crate::series::{smooth, value_range, Sample, SeriesError};

/// Numbers describing a detection run, kept for logs and traces
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DetectionSummary {
    pub strategy: DetectorStrategy,
    pub sample_count: usize,
    pub y_range: f64,
    pub threshold: f64,
    pub stats: ResolveStats,
}

/// Result of detecting a day's irrigation
/// "No irrigation today" is a legitimate outcome, not an error
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetectionOutcome {
    NoEvents {
        summary: DetectionSummary,
    },
    Events {
        events: Vec<IrrigationEvent>,
        selection: DaySelection,
        summary: DetectionSummary,
    },
}

impl DetectionOutcome {
    pub fn summary(&self) -> &DetectionSummary {
        match self {
            DetectionOutcome::NoEvents { summary } => summary,
            DetectionOutcome::Events { summary, .. } => summary,
        }
    }

    pub fn events(&self) -> &[IrrigationEvent] {
        match self {
            DetectionOutcome::NoEvents { .. } => &[],
            DetectionOutcome::Events { events, .. } => events,
        }
    }

    pub fn selection(&self) -> Option<&DaySelection> {
        match self {
            DetectionOutcome::NoEvents { .. } => None,
            DetectionOutcome::Events { selection, .. } => Some(selection),
        }
    }
}

/// Detect the irrigation events of one series
///
/// Pure and synchronous: smoothing, change detection and resolution run over
/// in-memory slices with an immutable config, so independent subjects can be
/// processed in parallel.
pub fn detect_day(samples: &[Sample], config: &DetectionConfig) -> Result<DetectionOutcome, SeriesError> {
    let smoothed = smooth(samples, config.smoothing_window)?;

    let detector = detector_for(config.strategy);
    let y_range = value_range(&smoothed);
    let threshold = detector.threshold(y_range, config);

    let detections = detector.detect(&smoothed, config);
    let policy = detector.boundary_policy(config);
    let outcome = resolve(&detections, &smoothed, samples, &policy, config);

    let summary = DetectionSummary {
        strategy: config.strategy,
        sample_count: samples.len(),
        y_range,
        threshold,
        stats: outcome.stats,
    };

    Ok(match outcome.selection() {
        Some(selection) => DetectionOutcome::Events {
            events: outcome.events,
            selection,
            summary,
        },
        None => DetectionOutcome::NoEvents { summary },
    })
}
