// Chart module
// Maps detected indices onto the rendered chart for confirmation clicks

pub mod mapping;

pub use mapping::{map_selection, map_to_screen, ChartGeometry, MappingError, PointPair, ScreenPoint};
