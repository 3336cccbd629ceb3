// Event resolution
// Groups raw detections, refines each into start/end boundaries and filters by time of day

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::Serialize;

use crate::config::{DaytimeWindow, DetectionConfig};
use crate::events::backend::{BoundaryPolicy, Lookback};
use crate::events::types::{DaySelection, IrrigationEvent, RawDetection};
use crate::series::{Sample, SmoothedSample};

/// Counters describing what happened during resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    /// Raw detections handed to the resolver
    pub raw_detections: usize,

    /// Groups left after deduplication
    pub groups: usize,

    /// Candidates whose boundaries did not bracket the detection
    pub rejected_degenerate: usize,

    /// Candidates starting outside the daytime window
    pub rejected_daytime: usize,
}

/// Resolved events for one series, sorted by start index
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub events: Vec<IrrigationEvent>,
    pub stats: ResolveStats,
}

impl ResolveOutcome {
    /// First start / last end across all surviving events
    pub fn selection(&self) -> Option<DaySelection> {
        DaySelection::from_events(&self.events)
    }
}

/// A deduplicated detection with the ordinal of its merge group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupedDetection {
    pub group_id: usize,
    pub detection: RawDetection,
}

/// Merge detections that lie within `merge_fraction` of the series length
///
/// Detections are sorted by index and chained: each one joins the current
/// group when it is within the merge distance of the previous member, so a
/// run of close detections collapses into one group however long it is. The
/// member with the largest absolute magnitude represents the group.
pub fn deduplicate(
    detections: &[RawDetection],
    series_len: usize,
    merge_fraction: f64,
) -> Vec<GroupedDetection> {
    if detections.is_empty() {
        return Vec::new();
    }

    let mut sorted = detections.to_vec();
    sorted.sort_by_key(|d| d.index);

    let merge_distance = merge_fraction * series_len as f64;

    let mut groups: Vec<GroupedDetection> = Vec::new();
    let mut best = sorted[0];
    let mut last_index = sorted[0].index;

    for d in &sorted[1..] {
        if (d.index - last_index) as f64 <= merge_distance {
            if d.strength() > best.strength() {
                best = *d;
            }
        } else {
            groups.push(GroupedDetection {
                group_id: groups.len(),
                detection: best,
            });
            best = *d;
        }
        last_index = d.index;
    }
    groups.push(GroupedDetection {
        group_id: groups.len(),
        detection: best,
    });

    groups
}

/// Resolve raw detections into irrigation events
pub fn resolve(
    detections: &[RawDetection],
    smoothed: &[SmoothedSample],
    samples: &[Sample],
    policy: &BoundaryPolicy,
    config: &DetectionConfig,
) -> ResolveOutcome {
    let mut stats = ResolveStats {
        raw_detections: detections.len(),
        ..Default::default()
    };

    let groups = deduplicate(detections, samples.len(), config.merge_fraction);
    stats.groups = groups.len();

    let mut events = Vec::with_capacity(groups.len());

    for group in &groups {
        let det = group.detection;
        if det.index >= samples.len() {
            stats.rejected_degenerate += 1;
            continue;
        }

        let start = refine_start(det.index, policy, smoothed, samples);
        let end = refine_end(det.index, policy, samples);

        let event = match (start, end) {
            (Some(s), Some(e)) => Some(IrrigationEvent::new(
                (s, samples[s].timestamp),
                &det,
                (e, samples[e].timestamp),
                group.group_id,
            )),
            _ => None,
        };

        let event = match event {
            Some(event) if event.is_well_formed() => event,
            _ => {
                log::debug!(
                    "Discarding degenerate candidate at index {} (start {:?}, end {:?})",
                    det.index,
                    start,
                    end
                );
                stats.rejected_degenerate += 1;
                continue;
            }
        };

        if let Some(window) = policy.daytime_filter {
            if !starts_in_daytime(&event, &window, config.utc_offset_minutes) {
                log::debug!(
                    "Rejecting event at index {}..{}: start outside {:02}:00-{:02}:59",
                    event.start_index,
                    event.end_index,
                    window.start_hour,
                    window.end_hour
                );
                stats.rejected_daytime += 1;
                continue;
            }
        }

        events.push(event);
    }

    events.sort_by_key(|e| e.start_index);

    if stats.rejected_daytime > 0 || stats.rejected_degenerate > 0 {
        log::info!(
            "Resolved {} events from {} groups ({} outside daytime, {} degenerate)",
            events.len(),
            stats.groups,
            stats.rejected_daytime,
            stats.rejected_degenerate
        );
    }

    ResolveOutcome { events, stats }
}

fn gap_exceeded(samples: &[Sample], earlier: usize, later: usize, max_gap_secs: f64) -> bool {
    samples[later].timestamp - samples[earlier].timestamp > max_gap_secs
}

/// Search backward from the detection for the event start
fn refine_start(
    det: usize,
    policy: &BoundaryPolicy,
    smoothed: &[SmoothedSample],
    samples: &[Sample],
) -> Option<usize> {
    match policy.lookback {
        Lookback::Fixed(points) => {
            let floor = det.saturating_sub(points);
            let mut best: Option<usize> = None;

            // Walking backward, strict comparison keeps the tie nearest the detection
            for j in (floor..det).rev() {
                if gap_exceeded(samples, j, j + 1, policy.max_gap_secs) {
                    break;
                }
                match best {
                    Some(b) if samples[j].value >= samples[b].value => {}
                    _ => best = Some(j),
                }
            }
            best
        }
        Lookback::ValleyTrace { max_points } => {
            let mut cur = det;
            while cur > 0 {
                let prev = cur - 1;
                if det - prev > max_points {
                    break;
                }
                if gap_exceeded(samples, prev, cur, policy.max_gap_secs) {
                    break;
                }
                // Bottom reached once the preceding value stops getting lower
                if smoothed[prev].value >= smoothed[cur].value {
                    break;
                }
                cur = prev;
            }
            (cur < det).then_some(cur)
        }
    }
}

/// Search forward from the detection for the recovered high point
fn refine_end(det: usize, policy: &BoundaryPolicy, samples: &[Sample]) -> Option<usize> {
    let last = samples.len().checked_sub(1)?;
    let ceiling = (det + policy.lookforward).min(last);
    let mut best: Option<usize> = None;

    for j in (det + 1)..=ceiling {
        if gap_exceeded(samples, j - 1, j, policy.max_gap_secs) {
            break;
        }
        // Ties move forward to the latest point of a plateau
        match best {
            Some(b) if samples[j].value < samples[b].value => {}
            _ => best = Some(j),
        }
    }
    best
}

/// Local hour of an epoch-seconds timestamp
pub fn local_hour(timestamp: f64, utc_offset_minutes: i32) -> Option<u32> {
    let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
    let secs = timestamp.floor() as i64;
    let utc: DateTime<Utc> = DateTime::from_timestamp(secs, 0)?;
    Some(utc.with_timezone(&offset).hour())
}

fn starts_in_daytime(event: &IrrigationEvent, window: &DaytimeWindow, utc_offset_minutes: i32) -> bool {
    local_hour(event.start_time, utc_offset_minutes)
        .map(|h| window.contains(h))
        .unwrap_or(false)
}
