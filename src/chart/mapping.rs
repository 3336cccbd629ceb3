// Coordinate mapping
// Converts a series index into an on-chart pixel position from render geometry

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MappingConfig;
use crate::events::DaySelection;
use crate::series::Sample;

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("Chart geometry not available")]
    MissingGeometry,

    #[error("Degenerate chart geometry: {0} has zero extent")]
    ZeroExtent(&'static str),

    #[error("Index {index} out of range for series of {len} samples")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Non-finite coordinate for index {0}")]
    NonFinite(usize),
}

/// A point in screen pixel space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        ScreenPoint { x, y }
    }
}

/// Start and end points of the day's selection
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointPair {
    pub start: ScreenPoint,
    pub end: ScreenPoint,
}

impl PointPair {
    pub fn new(start: ScreenPoint, end: ScreenPoint) -> Self {
        PointPair { start, end }
    }
}

/// Chart geometry supplied by the rendering collaborator for each render
///
/// Ranges are `(a, b)` pairs mapped onto each other linearly. `pixel_y_range`
/// holds the pixel row at the data minimum first, so a chart whose rows grow
/// downward is expressed as e.g. `(400.0, 40.0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartGeometry {
    pub pixel_x_range: (f64, f64),
    pub pixel_y_range: (f64, f64),
    pub data_x_range: (f64, f64),
    pub data_y_range: (f64, f64),
}

impl ChartGeometry {
    /// Fit data ranges to a series (the full timestamp span and value span)
    /// Returns None for an empty series
    pub fn fit_to_series(
        samples: &[Sample],
        pixel_x_range: (f64, f64),
        pixel_y_range: (f64, f64),
    ) -> Option<Self> {
        let first = samples.first()?;
        let last = samples.last()?;
        let (lo, hi) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s.value), hi.max(s.value))
            });

        Some(ChartGeometry {
            pixel_x_range,
            pixel_y_range,
            data_x_range: (first.timestamp, last.timestamp),
            data_y_range: (lo, hi),
        })
    }

    fn validate(&self) -> Result<(), MappingError> {
        let ranges = [
            ("pixel_x_range", self.pixel_x_range),
            ("pixel_y_range", self.pixel_y_range),
            ("data_x_range", self.data_x_range),
            ("data_y_range", self.data_y_range),
        ];

        for (name, (a, b)) in ranges {
            if (b - a).abs() < f64::EPSILON || !(b - a).is_finite() {
                return Err(MappingError::ZeroExtent(name));
            }
        }
        Ok(())
    }
}

fn lerp(value: f64, from: (f64, f64), to: (f64, f64)) -> f64 {
    to.0 + (value - from.0) / (from.1 - from.0) * (to.1 - to.0)
}

/// Map a series index to a clickable screen point
///
/// Timestamp maps onto the x range, value onto the y range, then the
/// configured vertical offset is added so the point lands inside the rendered
/// trace rather than on its edge.
pub fn map_to_screen(
    index: usize,
    samples: &[Sample],
    geometry: Option<&ChartGeometry>,
    config: &MappingConfig,
) -> Result<ScreenPoint, MappingError> {
    let geometry = geometry.ok_or(MappingError::MissingGeometry)?;
    geometry.validate()?;

    let sample = samples.get(index).ok_or(MappingError::IndexOutOfRange {
        index,
        len: samples.len(),
    })?;

    let x = lerp(sample.timestamp, geometry.data_x_range, geometry.pixel_x_range);
    let y = lerp(sample.value, geometry.data_y_range, geometry.pixel_y_range) + config.vertical_offset_px;

    if !x.is_finite() || !y.is_finite() {
        return Err(MappingError::NonFinite(index));
    }

    Ok(ScreenPoint::new(x, y))
}

/// Map both ends of the day's selection
pub fn map_selection(
    selection: &DaySelection,
    samples: &[Sample],
    geometry: Option<&ChartGeometry>,
    config: &MappingConfig,
) -> Result<PointPair, MappingError> {
    let start = map_to_screen(selection.start_index, samples, geometry, config)?;
    let end = map_to_screen(selection.end_index, samples, geometry, config)?;
    Ok(PointPair::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::samples_from_values;

    fn geometry() -> ChartGeometry {
        ChartGeometry {
            pixel_x_range: (100.0, 1100.0),
            pixel_y_range: (500.0, 100.0),
            data_x_range: (0.0, 1000.0),
            data_y_range: (0.0, 40.0),
        }
    }

    #[test]
    fn test_linear_mapping_with_inverted_y() {
        let samples = vec![Sample::new(0, 0.0, 0.0), Sample::new(1, 500.0, 20.0), Sample::new(2, 1000.0, 40.0)];
        let config = MappingConfig { vertical_offset_px: 0.0 };

        let p0 = map_to_screen(0, &samples, Some(&geometry()), &config).unwrap();
        let p1 = map_to_screen(1, &samples, Some(&geometry()), &config).unwrap();
        let p2 = map_to_screen(2, &samples, Some(&geometry()), &config).unwrap();

        assert_eq!(p0, ScreenPoint::new(100.0, 500.0));
        assert_eq!(p1, ScreenPoint::new(600.0, 300.0));
        assert_eq!(p2, ScreenPoint::new(1100.0, 100.0));
        // Higher value lands on a smaller pixel row
        assert!(p2.y < p0.y);
    }

    #[test]
    fn test_vertical_offset_applied() {
        let samples = vec![Sample::new(0, 500.0, 20.0)];
        let p = map_to_screen(0, &samples, Some(&geometry()), &MappingConfig::default()).unwrap();
        assert_eq!(p.y, 315.0);
    }

    #[test]
    fn test_missing_geometry() {
        let samples = vec![Sample::new(0, 0.0, 0.0)];
        let result = map_to_screen(0, &samples, None, &MappingConfig::default());
        assert_eq!(result, Err(MappingError::MissingGeometry));
    }

    #[test]
    fn test_zero_extent_ranges() {
        let samples = vec![Sample::new(0, 0.0, 0.0)];

        let mut g = geometry();
        g.data_y_range = (5.0, 5.0);
        assert_eq!(
            map_to_screen(0, &samples, Some(&g), &MappingConfig::default()),
            Err(MappingError::ZeroExtent("data_y_range"))
        );

        let mut g = geometry();
        g.pixel_x_range = (10.0, 10.0);
        assert_eq!(
            map_to_screen(0, &samples, Some(&g), &MappingConfig::default()),
            Err(MappingError::ZeroExtent("pixel_x_range"))
        );
    }

    #[test]
    fn test_index_out_of_range() {
        let samples = vec![Sample::new(0, 0.0, 0.0)];
        let result = map_to_screen(3, &samples, Some(&geometry()), &MappingConfig::default());
        assert_eq!(result, Err(MappingError::IndexOutOfRange { index: 3, len: 1 }));
    }

    #[test]
    fn test_fit_to_series_and_map_selection() {
        let samples = samples_from_values(&[10.0, 10.0, 30.0, 30.0], 0.0, 60.0);
        let g = ChartGeometry::fit_to_series(&samples, (0.0, 300.0), (200.0, 0.0)).unwrap();
        assert_eq!(g.data_x_range, (0.0, 180.0));
        assert_eq!(g.data_y_range, (10.0, 30.0));

        let selection = DaySelection {
            start_index: 1,
            start_time: 60.0,
            end_index: 3,
            end_time: 180.0,
        };
        let pair = map_selection(&selection, &samples, Some(&g), &MappingConfig { vertical_offset_px: 0.0 }).unwrap();

        assert_eq!(pair.start, ScreenPoint::new(100.0, 200.0));
        assert_eq!(pair.end, ScreenPoint::new(300.0, 0.0));
    }
}
