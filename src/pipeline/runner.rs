// Pipeline runner
// Per-subject detect → map → calibrate → confirm → click/record, and sequential batches

use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::calibration::{CalibrationError, CalibrationStore};
use crate::chart::{map_selection, ChartGeometry, MappingError, PointPair};
use crate::config::AppConfig;
use crate::confirm::{
    await_resolution, ActiveConfirmations, Clock, ConfirmMode, ConfirmationSignal, ConfirmationWorkflow,
    DisplayHandle, Resolution, TokioClock, WorkflowError,
};
use crate::events::{detect_day, DaySelection, DetectionOutcome, EventDecision};
use crate::pipeline::trace::{Stage, TraceBuilder, TraceEntry, TraceError, TraceWriter};
use crate::series::{parse_node_report_with_key, IngestError, Sample, SeriesError};
use crate::state::{read_file, StorageError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Series error: {0}")]
    Series(#[from] SeriesError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("Click failed: {0}")]
    Click(String),
}

/// A pipeline error located at a subject and stage
#[derive(Debug, Error)]
#[error("subject {subject_id} failed at {} stage: {source}", .stage.to_string())]
pub struct SubjectFailure {
    pub subject_id: String,
    pub stage: Stage,

    /// Selected start/end indices, when detection got that far
    pub index_range: Option<(usize, usize)>,

    #[source]
    pub source: PipelineError,
}

impl SubjectFailure {
    pub fn new(subject_id: impl Into<String>, stage: Stage, source: PipelineError) -> Self {
        SubjectFailure {
            subject_id: subject_id.into(),
            stage,
            index_range: None,
            source,
        }
    }
}

/// One farm / node to process
#[derive(Debug, Clone)]
pub struct SubjectInput {
    pub subject_id: String,
    pub samples: Vec<Sample>,
    pub geometry: Option<ChartGeometry>,
}

impl SubjectInput {
    pub fn new(subject_id: impl Into<String>, samples: Vec<Sample>, geometry: Option<ChartGeometry>) -> Self {
        SubjectInput {
            subject_id: subject_id.into(),
            samples,
            geometry,
        }
    }

    /// Build a subject from raw node report JSON
    pub fn from_report(
        subject_id: impl Into<String>,
        report: &[u8],
        geometry: Option<ChartGeometry>,
    ) -> Result<Self, SubjectFailure> {
        let subject_id = subject_id.into();
        match parse_node_report_with_key(report, None) {
            Ok(series) => Ok(SubjectInput::new(subject_id, series.samples, geometry)),
            Err(e) => Err(SubjectFailure::new(subject_id, Stage::Ingest, e.into())),
        }
    }

    /// Read and parse a node report file
    /// Both read and parse errors are ingest-stage failures for this subject
    pub fn from_report_file(
        subject_id: impl Into<String>,
        path: &Path,
        geometry: Option<ChartGeometry>,
    ) -> Result<Self, SubjectFailure> {
        let subject_id = subject_id.into();
        match read_file(path) {
            Ok(bytes) => SubjectInput::from_report(subject_id, &bytes, geometry),
            Err(e) => Err(SubjectFailure::new(subject_id, Stage::Ingest, e.into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubjectOutcome {
    NoEvents,
    Confirmed {
        selection: DaySelection,
        points: PointPair,
    },
    AutoConfirmed {
        selection: DaySelection,
        points: PointPair,
    },
    Corrected {
        selection: DaySelection,
        detected: PointPair,
        corrected: PointPair,
    },
    Skipped {
        selection: DaySelection,
    },
    /// Mapping failed and the policy accepts the selection without confirmation
    AcceptedUnconfirmed {
        selection: DaySelection,
    },
    MappingSkipped {
        selection: DaySelection,
    },
}

/// Click/record collaborator that acts on confirmed selections
pub trait ClickSink: Send + Sync {
    /// Click the start and end points on the chart
    fn click(&self, subject_id: &str, points: &PointPair) -> Result<(), PipelineError>;

    /// Record a selection that could not be shown for confirmation
    fn record_unconfirmed(&self, subject_id: &str, selection: &DaySelection) -> Result<(), PipelineError>;

    /// Display resource held while a confirmation is shown
    fn display(&self, _subject_id: &str) -> Option<Box<dyn DisplayHandle>> {
        None
    }
}

/// Sink that only logs what it would do
pub struct LoggingClickSink;

impl ClickSink for LoggingClickSink {
    fn click(&self, subject_id: &str, points: &PointPair) -> Result<(), PipelineError> {
        log::info!(
            "Click {}: start ({:.1}, {:.1}) end ({:.1}, {:.1})",
            subject_id,
            points.start.x,
            points.start.y,
            points.end.x,
            points.end.y
        );
        Ok(())
    }

    fn record_unconfirmed(&self, subject_id: &str, selection: &DaySelection) -> Result<(), PipelineError> {
        log::info!(
            "Unconfirmed selection for {}: indices {}..{}",
            subject_id,
            selection.start_index,
            selection.end_index
        );
        Ok(())
    }
}

/// Counts over a batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub no_events: usize,
    pub confirmed: usize,
    pub auto_confirmed: usize,
    pub corrected: usize,
    pub skipped: usize,
    pub accepted_unconfirmed: usize,
    pub mapping_skipped: usize,
    pub failed: usize,

    /// `(subject_id, error)` for each failed subject
    pub failures: Vec<(String, String)>,
}

impl BatchSummary {
    fn record(&mut self, outcome: &SubjectOutcome) {
        self.processed += 1;
        match outcome {
            SubjectOutcome::NoEvents => self.no_events += 1,
            SubjectOutcome::Confirmed { .. } => self.confirmed += 1,
            SubjectOutcome::AutoConfirmed { .. } => self.auto_confirmed += 1,
            SubjectOutcome::Corrected { .. } => self.corrected += 1,
            SubjectOutcome::Skipped { .. } => self.skipped += 1,
            SubjectOutcome::AcceptedUnconfirmed { .. } => self.accepted_unconfirmed += 1,
            SubjectOutcome::MappingSkipped { .. } => self.mapping_skipped += 1,
        }
    }

    fn record_failure(&mut self, failure: &SubjectFailure) {
        self.processed += 1;
        self.failed += 1;
        self.failures
            .push((failure.subject_id.clone(), failure.source.to_string()));
    }
}

pub struct Pipeline {
    config: AppConfig,
    store: CalibrationStore,
    sink: Box<dyn ClickSink>,
    clock: Box<dyn Clock>,
    active: ActiveConfirmations,
    trace: Option<TraceWriter>,
}

impl Pipeline {
    pub fn new(config: AppConfig, store: CalibrationStore, sink: Box<dyn ClickSink>) -> Self {
        Pipeline {
            config,
            store,
            sink,
            clock: Box::new(TokioClock),
            active: ActiveConfirmations::new(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, writer: TraceWriter) -> Self {
        self.trace = Some(writer);
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    /// Process one subject end to end
    ///
    /// Signals are taken from `signals` in order. No events and mapping
    /// failures are outcomes; everything else that goes wrong is returned as a
    /// `SubjectFailure` naming the stage.
    pub async fn process_subject(
        &self,
        subject: &SubjectInput,
        signals: &mut mpsc::Receiver<ConfirmationSignal>,
    ) -> Result<SubjectOutcome, SubjectFailure> {
        let id = subject.subject_id.as_str();
        let fail = |stage: Stage, range: Option<(usize, usize)>| {
            move |e: PipelineError| SubjectFailure {
                subject_id: id.to_string(),
                stage,
                index_range: range,
                source: e,
            }
        };

        // Detect
        let detect = TraceBuilder::new(id, Stage::Detect);
        self.trace(detect.started(format!("{} samples", subject.samples.len())));

        let outcome = detect_day(&subject.samples, &self.config.detection)
            .map_err(PipelineError::from)
            .map_err(fail(Stage::Detect, None))?;

        let (events, selection) = match &outcome {
            DetectionOutcome::NoEvents { summary } => {
                log::info!(
                    "No irrigation detected for {} ({} samples, threshold {:.3})",
                    id,
                    summary.sample_count,
                    summary.threshold
                );
                self.trace(detect.completed("no events"));
                return Ok(SubjectOutcome::NoEvents);
            }
            DetectionOutcome::Events { events, selection, .. } => (events, *selection),
        };

        for event in events {
            let decision = EventDecision::from_event(event, outcome.summary(), self.config.detection.utc_offset_minutes);
            log::debug!("{}: {}", id, decision.reasoning);
        }

        let range = Some((selection.start_index, selection.end_index));
        log::info!(
            "{}: {} event(s), selection indices {}..{}",
            id,
            events.len(),
            selection.start_index,
            selection.end_index
        );
        self.trace(
            detect
                .completed(format!("{} event(s)", events.len()))
                .with_data(serde_json::json!(selection)),
        );

        // Map
        let map = TraceBuilder::new(id, Stage::Map);
        let mapped = match map_selection(&selection, &subject.samples, subject.geometry.as_ref(), &self.config.mapping) {
            Ok(points) => points,
            Err(e) => {
                log::warn!(
                    "Mapping failed for {} at indices {}..{}: {}",
                    id,
                    selection.start_index,
                    selection.end_index,
                    e
                );
                self.trace(map.failed(e.to_string()));

                if !self.config.confirmation.accept_unconfirmed_on_mapping_failure {
                    return Ok(SubjectOutcome::MappingSkipped { selection });
                }

                self.sink
                    .record_unconfirmed(id, &selection)
                    .map_err(fail(Stage::Click, range))?;
                return Ok(SubjectOutcome::AcceptedUnconfirmed { selection });
            }
        };
        self.trace(map.completed("mapped").with_data(serde_json::json!(mapped)));

        // Calibrate
        let mode = self.config.confirmation.mode;
        let presented = match mode {
            ConfirmMode::Training => mapped,
            ConfirmMode::Confirmation => {
                let profile = self.store.profile();
                log::info!(
                    "Calibration tier {} ({} corrections) for {}",
                    profile.confidence_tier.display_name(),
                    profile.sample_count,
                    id
                );
                self.trace(
                    TraceBuilder::new(id, Stage::Calibrate)
                        .completed(profile.confidence_tier.display_name())
                        .with_data(serde_json::json!(profile)),
                );
                profile.adjust(mapped)
            }
        };

        // Confirm
        let confirm = TraceBuilder::new(id, Stage::Confirm);
        self.trace(confirm.started(mode.to_string()));

        let slot = self
            .active
            .acquire(id)
            .map_err(PipelineError::from)
            .map_err(fail(Stage::Confirm, range))?;
        let mut workflow = ConfirmationWorkflow::new(slot, mode, presented, self.config.confirmation.timeout());
        if let Some(display) = self.sink.display(id) {
            workflow = workflow.with_display(display);
        }

        let resolution = await_resolution(&mut workflow, signals, self.clock.as_ref())
            .await
            .map_err(PipelineError::from)
            .map_err(fail(Stage::Confirm, range))?;
        drop(workflow);
        self.trace(confirm.completed(format!("{:?}", resolution.state())));

        // Click / record
        match resolution {
            Resolution::Confirmed { points } => {
                self.click(id, &points).map_err(fail(Stage::Click, range))?;
                Ok(SubjectOutcome::Confirmed { selection, points })
            }
            Resolution::AutoConfirmed { points } => {
                self.click(id, &points).map_err(fail(Stage::Click, range))?;
                Ok(SubjectOutcome::AutoConfirmed { selection, points })
            }
            Resolution::Corrected { detected, corrected } => {
                self.store
                    .record_correction(id, detected, corrected)
                    .map_err(PipelineError::from)
                    .map_err(fail(Stage::Record, range))?;
                self.trace(TraceBuilder::new(id, Stage::Record).completed("correction recorded"));

                self.click(id, &corrected).map_err(fail(Stage::Click, range))?;
                Ok(SubjectOutcome::Corrected {
                    selection,
                    detected,
                    corrected,
                })
            }
            Resolution::Skipped => Ok(SubjectOutcome::Skipped { selection }),
        }
    }

    /// Process subjects strictly one after another
    /// A failing subject is logged and counted; the batch carries on
    pub async fn run_batch(
        &self,
        subjects: &[SubjectInput],
        signals: &mut mpsc::Receiver<ConfirmationSignal>,
    ) -> BatchSummary {
        self.run_items(subjects.iter().map(Ok), signals).await
    }

    /// Like `run_batch`, for subjects whose reports may have failed to load
    ///
    /// Ingest failures are logged, traced and counted in place, so they show up
    /// in the summary in input order alongside the subjects that did load.
    pub async fn run_loaded(
        &self,
        subjects: &[Result<SubjectInput, SubjectFailure>],
        signals: &mut mpsc::Receiver<ConfirmationSignal>,
    ) -> BatchSummary {
        self.run_items(subjects.iter().map(Result::as_ref), signals).await
    }

    async fn run_items<'a>(
        &self,
        items: impl ExactSizeIterator<Item = Result<&'a SubjectInput, &'a SubjectFailure>>,
        signals: &mut mpsc::Receiver<ConfirmationSignal>,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let total = items.len();

        for (i, item) in items.enumerate() {
            let subject = match item {
                Ok(subject) => subject,
                Err(failure) => {
                    log::info!("[{}/{}] Skipping {}", i + 1, total, failure.subject_id);
                    self.report_failure(failure, &mut summary);
                    continue;
                }
            };
            log::info!("[{}/{}] Processing {}", i + 1, total, subject.subject_id);

            match self.process_subject(subject, signals).await {
                Ok(outcome) => summary.record(&outcome),
                Err(failure) => self.report_failure(&failure, &mut summary),
            }
        }

        log::info!(
            "Batch complete: {} processed, {} failed, {} confirmed, {} auto-confirmed, {} corrected",
            summary.processed,
            summary.failed,
            summary.confirmed,
            summary.auto_confirmed,
            summary.corrected
        );
        summary
    }

    fn report_failure(&self, failure: &SubjectFailure, summary: &mut BatchSummary) {
        match failure.index_range {
            Some((start, end)) => log::error!("{} (indices {}..{})", failure, start, end),
            None => log::error!("{}", failure),
        }
        self.trace(TraceBuilder::new(&failure.subject_id, failure.stage).failed(failure.source.to_string()));
        summary.record_failure(failure);
    }

    fn click(&self, subject_id: &str, points: &PointPair) -> Result<(), PipelineError> {
        self.sink.click(subject_id, points)?;
        self.trace(TraceBuilder::new(subject_id, Stage::Click).completed("clicked"));
        Ok(())
    }

    fn trace(&self, entry: TraceEntry) {
        if let Some(writer) = &self.trace {
            if let Err(e) = writer.write(&entry) {
                log::warn!("Failed to write trace entry to {}: {}", writer.path().display(), e);
            }
        }
    }
}
