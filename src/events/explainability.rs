// Explainability module
// Turns resolved events into readable decisions for logs, traces and the CLI

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::detection::DetectionSummary;
use crate::events::types::{Direction, IrrigationEvent};

/// Complete decision information for a single event
/// showing how it moved through detection and refinement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDecision {
    /// Original event ID
    pub event_id: Uuid,

    // --- Detection ---
    pub detection_index: usize,
    pub magnitude: f64,
    pub direction: Direction,
    pub group_id: usize,

    // --- Boundaries ---
    pub start_index: usize,
    pub start_clock: String,
    pub end_index: usize,
    pub end_clock: String,

    // --- Explainability ---
    pub reasoning: String,
}

impl EventDecision {
    /// Create a decision object from an event and its detection run
    pub fn from_event(event: &IrrigationEvent, summary: &DetectionSummary, utc_offset_minutes: i32) -> Self {
        let start_clock = clock_time(event.start_time, utc_offset_minutes);
        let end_clock = clock_time(event.end_time, utc_offset_minutes);

        let mut reason_parts = Vec::new();

        // 1. Detection
        reason_parts.push(format!(
            "Flagged as a {} of {:.3} at index {} ({} strategy, threshold {:.3} on range {:.3}).",
            event.direction.display_name(),
            event.magnitude.abs(),
            event.detection_index,
            summary.strategy.to_string(),
            summary.threshold,
            summary.y_range
        ));

        // 2. Grouping
        if summary.stats.raw_detections > summary.stats.groups {
            reason_parts.push(format!(
                "Strongest member of merge group {} ({} raw detections across {} groups).",
                event.group_id, summary.stats.raw_detections, summary.stats.groups
            ));
        }

        // 3. Boundaries
        let minutes = event.duration_secs() / 60.0;
        reason_parts.push(format!(
            "Starts at index {} ({}) and ends at index {} ({}), {:.0} min.",
            event.start_index, start_clock, event.end_index, end_clock, minutes
        ));

        EventDecision {
            event_id: event.id,
            detection_index: event.detection_index,
            magnitude: event.magnitude,
            direction: event.direction,
            group_id: event.group_id,
            start_index: event.start_index,
            start_clock,
            end_index: event.end_index,
            end_clock,
            reasoning: reason_parts.join(" "),
        }
    }
}

/// Local wall-clock time (HH:MM) of an epoch-seconds timestamp
pub fn clock_time(timestamp: f64, utc_offset_minutes: i32) -> String {
    let offset = utc_offset_minutes.checked_mul(60).and_then(FixedOffset::east_opt);
    let utc = DateTime::<Utc>::from_timestamp(timestamp.floor() as i64, 0);

    match (utc, offset) {
        (Some(utc), Some(offset)) => utc.with_timezone(&offset).format("%H:%M").to_string(),
        _ => format!("t={:.0}", timestamp),
    }
}
