// Event detection types
// Raw change detections, resolved irrigation events and the day's selection

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sign convention of a raw detection
/// The two detection strategies label the same physical step in opposite ways
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Leading average above trailing average (level increases)
    Rise,

    /// Trailing value above leading value
    Drop,
}

impl Direction {
    /// Human-readable name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            Direction::Rise => "rise",
            Direction::Drop => "drop",
        }
    }
}

/// A candidate change point before grouping and refinement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Index into the series where the change was flagged
    pub index: usize,

    /// Signed difference between the local averages around `index`
    pub magnitude: f64,

    pub direction: Direction,
}

impl RawDetection {
    pub fn new(index: usize, magnitude: f64, direction: Direction) -> Self {
        RawDetection {
            index,
            magnitude,
            direction,
        }
    }

    /// Size of the change regardless of sign convention
    pub fn strength(&self) -> f64 {
        self.magnitude.abs()
    }
}

/// A resolved irrigation event with refined boundaries
/// Invariant: `start_index < detection_index < end_index`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrrigationEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    pub start_index: usize,

    /// Timestamp (epoch seconds) of the start sample
    pub start_time: f64,

    /// Index of the raw detection this event was refined from
    pub detection_index: usize,

    pub end_index: usize,

    /// Timestamp (epoch seconds) of the end sample
    pub end_time: f64,

    pub magnitude: f64,

    pub direction: Direction,

    /// Ordinal of the dedup group this event came from
    pub group_id: usize,
}

impl IrrigationEvent {
    /// Create a new event with generated UUID
    pub fn new(
        start: (usize, f64),
        detection: &RawDetection,
        end: (usize, f64),
        group_id: usize,
    ) -> Self {
        IrrigationEvent {
            id: Uuid::new_v4(),
            start_index: start.0,
            start_time: start.1,
            detection_index: detection.index,
            end_index: end.0,
            end_time: end.1,
            magnitude: detection.magnitude,
            direction: detection.direction,
            group_id,
        }
    }

    /// Duration in seconds from start to end sample
    pub fn duration_secs(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether the boundaries bracket the detection strictly
    pub fn is_well_formed(&self) -> bool {
        self.start_index < self.detection_index && self.detection_index < self.end_index
    }
}

/// The day's answer: first start of the earliest event, last end of the latest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DaySelection {
    pub start_index: usize,
    pub start_time: f64,
    pub end_index: usize,
    pub end_time: f64,
}

impl DaySelection {
    /// Select from events sorted by start index
    /// Returns None when there are no events
    pub fn from_events(events: &[IrrigationEvent]) -> Option<Self> {
        let first = events.first()?;
        let last = events.last()?;

        Some(DaySelection {
            start_index: first.start_index,
            start_time: first.start_time,
            end_index: last.end_index,
            end_time: last.end_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(start: usize, det: usize, end: usize) -> IrrigationEvent {
        let detection = RawDetection::new(det, 2.0, Direction::Rise);
        IrrigationEvent::new(
            (start, start as f64 * 60.0),
            &detection,
            (end, end as f64 * 60.0),
            0,
        )
    }

    #[test]
    fn test_strength_ignores_sign() {
        let rise = RawDetection::new(3, 1.5, Direction::Rise);
        let drop = RawDetection::new(3, -1.5, Direction::Drop);
        assert_eq!(rise.strength(), drop.strength());
    }

    #[test]
    fn test_event_creation() {
        let e = event(4, 5, 9);

        assert_eq!(e.start_index, 4);
        assert_eq!(e.detection_index, 5);
        assert_eq!(e.end_index, 9);
        assert_eq!(e.duration_secs(), 300.0);
        assert!(e.is_well_formed());
        assert!(!event(5, 5, 9).is_well_formed());
    }

    #[test]
    fn test_selection_spans_first_and_last() {
        let events = vec![event(2, 5, 10), event(30, 35, 60)];
        let sel = DaySelection::from_events(&events).unwrap();

        assert_eq!(sel.start_index, 2);
        assert_eq!(sel.end_index, 60);
        assert_eq!(sel.start_time, 120.0);
        assert_eq!(sel.end_time, 3600.0);
    }

    #[test]
    fn test_single_event_selection_differs() {
        let events = vec![event(4, 5, 9)];
        let sel = DaySelection::from_events(&events).unwrap();
        assert_ne!(sel.start_index, sel.end_index);
    }

    #[test]
    fn test_selection_empty() {
        assert!(DaySelection::from_events(&[]).is_none());
    }
}
