// Calibration profile
// Correction records and the offset profile recomputed from them on every read

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chart::{PointPair, ScreenPoint};

/// How much correction data backs the current offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    None,
    Early,
    Growing,
    Trained,
}

impl ConfidenceTier {
    /// Tier for a number of recorded corrections
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => ConfidenceTier::None,
            1..=4 => ConfidenceTier::Early,
            5..=19 => ConfidenceTier::Growing,
            _ => ConfidenceTier::Trained,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ConfidenceTier::None => "none",
            ConfidenceTier::Early => "early",
            ConfidenceTier::Growing => "growing",
            ConfidenceTier::Trained => "trained",
        }
    }
}

/// Additive pixel correction
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub dx: f64,
    pub dy: f64,
}

impl Offset {
    pub fn new(dx: f64, dy: f64) -> Self {
        Offset { dx, dy }
    }

    /// Offset that moves `from` onto `to`
    pub fn between(from: &ScreenPoint, to: &ScreenPoint) -> Self {
        Offset {
            dx: to.x - from.x,
            dy: to.y - from.y,
        }
    }
}

/// Shift a point by an offset
pub fn apply_offset(point: ScreenPoint, offset: Offset) -> ScreenPoint {
    ScreenPoint::new(point.x + offset.dx, point.y + offset.dy)
}

/// A single human correction of a detected start/end pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    /// Farm / node identifier the correction was made for
    pub subject_id: String,

    pub detected: PointPair,

    pub corrected: PointPair,
}

impl CalibrationRecord {
    /// Create a record stamped with the current time
    pub fn new(subject_id: impl Into<String>, detected: PointPair, corrected: PointPair) -> Self {
        CalibrationRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            subject_id: subject_id.into(),
            detected,
            corrected,
        }
    }

    /// `corrected - detected` for the start point
    pub fn start_delta(&self) -> Offset {
        Offset::between(&self.detected.start, &self.corrected.start)
    }

    /// `corrected - detected` for the end point
    pub fn end_delta(&self) -> Offset {
        Offset::between(&self.detected.end, &self.corrected.end)
    }
}

/// Offset profile derived from the full correction log
/// Never stored; always recomputed from the records
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub sample_count: usize,
    pub mean_offset_start: Offset,
    pub mean_offset_end: Offset,
    pub confidence_tier: ConfidenceTier,
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self::empty()
    }
}

impl CalibrationProfile {
    /// Profile with no data: zero offsets, tier `none`
    pub fn empty() -> Self {
        CalibrationProfile {
            sample_count: 0,
            mean_offset_start: Offset::default(),
            mean_offset_end: Offset::default(),
            confidence_tier: ConfidenceTier::None,
        }
    }

    /// Mean start and end deltas over all records, kept separate
    pub fn from_records(records: &[CalibrationRecord]) -> Self {
        if records.is_empty() {
            return Self::empty();
        }

        let n = records.len() as f64;
        let (start, end) = records.iter().fold(
            (Offset::default(), Offset::default()),
            |(s, e), r| {
                let ds = r.start_delta();
                let de = r.end_delta();
                (
                    Offset::new(s.dx + ds.dx, s.dy + ds.dy),
                    Offset::new(e.dx + de.dx, e.dy + de.dy),
                )
            },
        );

        CalibrationProfile {
            sample_count: records.len(),
            mean_offset_start: Offset::new(start.dx / n, start.dy / n),
            mean_offset_end: Offset::new(end.dx / n, end.dy / n),
            confidence_tier: ConfidenceTier::from_count(records.len()),
        }
    }

    /// Offsets and tier, as surfaced to callers
    pub fn offsets(&self) -> (Offset, Offset, ConfidenceTier) {
        (self.mean_offset_start, self.mean_offset_end, self.confidence_tier)
    }

    /// Shift detected points by the learned offsets
    /// Points pass through unchanged while the tier is `none`
    pub fn adjust(&self, detected: PointPair) -> PointPair {
        if self.confidence_tier == ConfidenceTier::None {
            return detected;
        }

        PointPair::new(
            apply_offset(detected.start, self.mean_offset_start),
            apply_offset(detected.end, self.mean_offset_end),
        )
    }
}
