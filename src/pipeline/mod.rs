// Pipeline execution and monitoring module
// Orchestrates detection, confirmation and calibration per subject

pub mod runner;
pub mod trace;

pub use runner::{
    BatchSummary, ClickSink, LoggingClickSink, Pipeline, PipelineError, SubjectFailure, SubjectInput,
    SubjectOutcome,
};
pub use trace::{read_trace_file, Stage, StageStatus, TraceBuilder, TraceEntry, TraceError, TraceWriter};
