// Sensor series module
// Ingests node reports and smooths the resulting sample sequence

pub mod ingest;
pub mod smoothing;
pub mod types;

pub use ingest::{parse_node_report, parse_node_report_with_key, IngestError, SensorSeries};
pub use smoothing::{smooth, DEFAULT_SMOOTHING_WINDOW, MIN_SAMPLES};
pub use types::{samples_from_values, value_range, Sample, SeriesError, SmoothedSample};
