use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use slabwatch_lib::calibration::{CalibrationProfile, CalibrationStore};
use slabwatch_lib::chart::{map_selection, ChartGeometry, PointPair, ScreenPoint};
use slabwatch_lib::config::AppConfig;
use slabwatch_lib::confirm::{ConfirmMode, ConfirmationSignal};
use slabwatch_lib::events::{detect_day, DetectionOutcome, DetectorStrategy, EventDecision};
use slabwatch_lib::pipeline::{LoggingClickSink, Pipeline, SubjectInput, TraceWriter};
use slabwatch_lib::series::parse_node_report_with_key;
use slabwatch_lib::state::{get_trace_dir, read_file, resolve_dir};

#[derive(Parser, Debug)]
#[command(author, version, about = "Irrigation event detection and calibration", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect the day's irrigation in one node report and print it as JSON
    Detect(DetectArgs),
    /// Run the confirmation pipeline over reports, reading signals from stdin
    Run(RunArgs),
    /// Print the calibration profile
    Profile,
    /// Append a correction to the calibration log
    Record(RecordArgs),
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StrategyOpt {
    WindowedDrop,
    Surge,
}

impl From<StrategyOpt> for DetectorStrategy {
    fn from(opt: StrategyOpt) -> Self {
        match opt {
            StrategyOpt::WindowedDrop => DetectorStrategy::WindowedDrop,
            StrategyOpt::Surge => DetectorStrategy::Surge,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeOpt {
    Confirmation,
    Training,
}

impl From<ModeOpt> for ConfirmMode {
    fn from(opt: ModeOpt) -> Self {
        match opt {
            ModeOpt::Confirmation => ConfirmMode::Confirmation,
            ModeOpt::Training => ConfirmMode::Training,
        }
    }
}

#[derive(Parser, Debug)]
struct DetectArgs {
    /// Node report JSON
    #[arg(value_hint = ValueHint::FilePath)]
    report: PathBuf,

    /// Detection strategy (overrides config)
    #[arg(long, value_enum)]
    strategy: Option<StrategyOpt>,

    /// Chart geometry JSON; when given, the selection is mapped to pixels
    #[arg(long, value_hint = ValueHint::FilePath)]
    geometry: Option<PathBuf>,

    /// Sensor key to read instead of the discovered one
    #[arg(long)]
    key: Option<String>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Node report JSON files, one subject each
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    reports: Vec<PathBuf>,

    #[arg(long, value_enum)]
    strategy: Option<StrategyOpt>,

    /// Confirmation mode (overrides config)
    #[arg(long, value_enum)]
    mode: Option<ModeOpt>,

    /// Chart geometry JSON shared by all subjects
    #[arg(long, value_hint = ValueHint::FilePath)]
    geometry: Option<PathBuf>,

    /// Write a JSONL stage trace
    #[arg(long)]
    trace: bool,
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Subject the correction belongs to
    #[arg(long)]
    subject: String,

    /// Detected points: x1 y1 x2 y2
    #[arg(long, required = true, num_args = 4, value_names = ["X1", "Y1", "X2", "Y2"], allow_negative_numbers = true)]
    detected: Vec<f64>,

    /// Corrected points: x1 y1 x2 y2
    #[arg(long, required = true, num_args = 4, value_names = ["X1", "Y1", "X2", "Y2"], allow_negative_numbers = true)]
    corrected: Vec<f64>,
}

#[derive(Serialize)]
struct DetectReport<'a> {
    subject_id: String,
    sensor_key: &'a str,
    skipped_leading: usize,
    dropped_entries: usize,
    out_of_order_entries: usize,
    outcome: &'a DetectionOutcome,
    decisions: Vec<EventDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    points: Option<PointPair>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };

    match cli.command {
        Command::Detect(args) => handle_detect(config, args),
        Command::Run(args) => handle_run(config, args).await,
        Command::Profile => handle_profile(&config),
        Command::Record(args) => handle_record(&config, args),
    }
}

fn open_store(config: &AppConfig) -> Result<CalibrationStore> {
    match &config.calibration.path {
        Some(path) => Ok(CalibrationStore::new(path.clone())),
        None => CalibrationStore::open_default().context("locating calibration store"),
    }
}

fn subject_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn load_geometry(path: Option<&Path>) -> Result<Option<ChartGeometry>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let bytes = read_file(path).with_context(|| format!("reading geometry {}", path.display()))?;
    let geometry = serde_json::from_slice(&bytes).with_context(|| format!("parsing geometry {}", path.display()))?;
    Ok(Some(geometry))
}

fn handle_detect(mut config: AppConfig, args: DetectArgs) -> Result<()> {
    if let Some(strategy) = args.strategy {
        config.detection.strategy = strategy.into();
    }

    let bytes = read_file(&args.report).with_context(|| format!("reading report {}", args.report.display()))?;
    let series = parse_node_report_with_key(&bytes, args.key.as_deref())
        .with_context(|| format!("parsing report {}", args.report.display()))?;

    let outcome = detect_day(&series.samples, &config.detection).context("detecting events")?;
    let decisions = outcome
        .events()
        .iter()
        .map(|e| EventDecision::from_event(e, outcome.summary(), config.detection.utc_offset_minutes))
        .collect();

    let geometry = load_geometry(args.geometry.as_deref())?;
    let points = match (outcome.selection(), geometry) {
        (Some(selection), Some(geometry)) => {
            let mapped = map_selection(selection, &series.samples, Some(&geometry), &config.mapping)
                .context("mapping selection to chart")?;
            Some(match config.confirmation.mode {
                ConfirmMode::Confirmation => open_store(&config)?.profile().adjust(mapped),
                ConfirmMode::Training => mapped,
            })
        }
        _ => None,
    };

    let report = DetectReport {
        subject_id: subject_id(&args.report),
        sensor_key: &series.sensor_key,
        skipped_leading: series.skipped_leading,
        dropped_entries: series.dropped_entries,
        out_of_order_entries: series.out_of_order_entries,
        outcome: &outcome,
        decisions,
        points,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn handle_run(mut config: AppConfig, args: RunArgs) -> Result<()> {
    if let Some(strategy) = args.strategy {
        config.detection.strategy = strategy.into();
    }
    if let Some(mode) = args.mode {
        config.confirmation.mode = mode.into();
    }

    let geometry = load_geometry(args.geometry.as_deref())?;
    let subjects: Vec<_> = args
        .reports
        .iter()
        .map(|path| SubjectInput::from_report_file(subject_id(path), path, geometry))
        .collect();

    let store = open_store(&config)?;
    let trace_dir = config.trace.dir.clone();
    let mut pipeline = Pipeline::new(config, store, Box::new(LoggingClickSink));
    if args.trace || trace_dir.is_some() {
        let dir = resolve_dir(trace_dir.as_deref(), get_trace_dir).context("creating trace directory")?;
        let writer = TraceWriter::for_run(&dir);
        log::info!("Writing trace to {}", writer.path().display());
        pipeline = pipeline.with_trace(writer);
    }

    // Plain thread so a pending stdin read never holds up runtime shutdown
    let (tx, mut rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_signal(&line) {
                Ok(Some(signal)) => {
                    if tx.blocking_send(signal).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("{}", e),
            }
        }
    });

    let summary = pipeline.run_loaded(&subjects, &mut rx).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.failed > 0 {
        bail!("{} of {} subjects failed", summary.failed, summary.processed);
    }
    Ok(())
}

fn handle_profile(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let profile: CalibrationProfile = store.profile();
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

fn handle_record(config: &AppConfig, args: RecordArgs) -> Result<()> {
    let detected = point_pair(&args.detected)?;
    let corrected = point_pair(&args.corrected)?;

    let store = open_store(config)?;
    let record = store
        .record_correction(&args.subject, detected, corrected)
        .context("appending correction")?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn point_pair(coords: &[f64]) -> Result<PointPair> {
    match coords {
        [x1, y1, x2, y2] => Ok(PointPair::new(ScreenPoint::new(*x1, *y1), ScreenPoint::new(*x2, *y2))),
        _ => Err(anyhow!("expected 4 coordinates, got {}", coords.len())),
    }
}

/// Parse one stdin line: `a`, `r`, `t` or `c x1 y1 x2 y2`
/// Blank lines yield None
fn parse_signal(line: &str) -> Result<Option<ConfirmationSignal>> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(None);
    };

    let signal = match cmd.to_ascii_lowercase().as_str() {
        "a" | "accept" => ConfirmationSignal::Accept,
        "r" | "reject" => ConfirmationSignal::Reject,
        "t" | "timeout" => ConfirmationSignal::Timeout,
        "c" | "correct" => {
            let coords = parts
                .map(|p| p.parse::<f64>().with_context(|| format!("bad coordinate {:?}", p)))
                .collect::<Result<Vec<_>>>()?;
            ConfirmationSignal::Correct {
                points: point_pair(&coords)?,
            }
        }
        other => bail!("unknown signal {:?}", other),
    };
    Ok(Some(signal))
}
