// Node report ingestion
// Extracts a sensor series from the raw node-data JSON captured off the dashboard

use chrono::DateTime;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::series::types::Sample;

/// How many leading entries are inspected when looking for a populated one
const TEMPLATE_SCAN_LIMIT: usize = 10;

/// Epoch values above this are treated as milliseconds
const MILLIS_THRESHOLD: f64 = 1.0e11;

/// Sensor key families in priority order
const SENSOR_FAMILIES: [&str; 3] = ["slabwgt", "calslabvwc", "slabvwc"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to parse report JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Node data array is empty")]
    EmptyReport,

    #[error("All of the first {0} entries are empty")]
    AllEntriesEmpty(usize),

    #[error("No slab sensor key found in entry {0}")]
    NoSensorKey(usize),

    #[error("Sensor key '{0}' not present in report")]
    UnknownSensorKey(String),

    #[error("Report is not a node data array")]
    UnexpectedShape,
}

/// A sensor series extracted from a report
#[derive(Debug, Clone, Serialize)]
pub struct SensorSeries {
    /// The key the values were read from (e.g. "slabwgt_1")
    pub sensor_key: String,

    /// All sensor keys discovered on the template entry
    pub available_keys: Vec<String>,

    /// Leading entries skipped because they were empty
    pub skipped_leading: usize,

    /// Entries dropped for missing values or timestamps
    pub dropped_entries: usize,

    /// Entries dropped because their timestamp went backwards
    pub out_of_order_entries: usize,

    pub samples: Vec<Sample>,
}

/// Parse a node report and extract the preferred sensor series
pub fn parse_node_report(json: &[u8]) -> Result<SensorSeries, IngestError> {
    parse_node_report_with_key(json, None)
}

/// Parse a node report, optionally forcing a specific sensor key
pub fn parse_node_report_with_key(
    json: &[u8],
    sensor_key: Option<&str>,
) -> Result<SensorSeries, IngestError> {
    let root: Value = serde_json::from_slice(json)?;
    let entries = node_entries(&root)?;

    if entries.is_empty() {
        return Err(IngestError::EmptyReport);
    }

    let (template_idx, template) = find_template_entry(entries)?;
    if template_idx > 0 {
        log::info!(
            "Skipped {} empty entries, using entry [{}]",
            template_idx,
            template_idx
        );
    }

    let available_keys = sensor_keys(template);

    let chosen = match sensor_key {
        Some(key) => {
            if !template.contains_key(key) {
                return Err(IngestError::UnknownSensorKey(key.to_string()));
            }
            key.to_string()
        }
        None => preferred_key(&available_keys).ok_or(IngestError::NoSensorKey(template_idx))?,
    };

    let mut samples: Vec<Sample> = Vec::with_capacity(entries.len() - template_idx);
    let mut dropped = 0;
    let mut out_of_order = 0;

    for entry in &entries[template_idx..] {
        let reading = entry.as_object().and_then(|obj| {
            let ts = obj.get("timestamp").and_then(parse_timestamp)?;
            let value = obj.get(&chosen).and_then(parse_number)?;
            Some((ts, value))
        });

        match reading {
            Some((timestamp, _)) if samples.last().is_some_and(|s| timestamp < s.timestamp) => {
                out_of_order += 1;
            }
            Some((timestamp, value)) => {
                samples.push(Sample::new(samples.len(), timestamp, value));
            }
            None => dropped += 1,
        }
    }

    if out_of_order > 0 {
        log::warn!(
            "Dropped {} entries of '{}' with timestamps earlier than the previous sample",
            out_of_order,
            chosen
        );
    }

    log::debug!(
        "Extracted {} samples from '{}' ({} dropped)",
        samples.len(),
        chosen,
        dropped
    );

    Ok(SensorSeries {
        sensor_key: chosen,
        available_keys,
        skipped_leading: template_idx,
        out_of_order_entries: out_of_order,
        dropped_entries: dropped,
        samples,
    })
}

/// Locate the entry array: a bare array, or `data` / `nodeData` on an object
fn node_entries(root: &Value) -> Result<&[Value], IngestError> {
    match root {
        Value::Array(items) => Ok(items),
        Value::Object(obj) => ["nodeData", "data"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array))
            .map(|v| v.as_slice())
            .ok_or(IngestError::UnexpectedShape),
        _ => Err(IngestError::UnexpectedShape),
    }
}

/// First entry (within the scan limit) holding more than just a timestamp
fn find_template_entry(entries: &[Value]) -> Result<(usize, &Map<String, Value>), IngestError> {
    let limit = TEMPLATE_SCAN_LIMIT.min(entries.len());

    entries[..limit]
        .iter()
        .enumerate()
        .find_map(|(i, e)| e.as_object().filter(|o| o.len() > 1).map(|o| (i, o)))
        .ok_or(IngestError::AllEntriesEmpty(limit))
}

/// Slab sensor keys on an entry, tolerating numbered suffixes
fn sensor_keys(entry: &Map<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = entry
        .keys()
        .filter(|k| k.as_str() != "timestamp")
        .filter(|k| {
            let lower = k.to_lowercase();
            SENSOR_FAMILIES.iter().any(|f| lower.contains(f))
        })
        .cloned()
        .collect();
    keys.sort();
    keys
}

fn preferred_key(keys: &[String]) -> Option<String> {
    for family in SENSOR_FAMILIES {
        let hit = keys.iter().find(|k| {
            let lower = k.to_lowercase();
            // "slabvwc" is a substring of "calslabvwc"; keep the families apart
            lower.contains(family) && !(family == "slabvwc" && lower.contains("calslabvwc"))
        });
        if let Some(k) = hit {
            return Some(k.clone());
        }
    }
    None
}

fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Timestamps arrive as epoch seconds, epoch milliseconds or RFC 3339 strings
fn parse_timestamp(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().map(normalize_epoch),
        Value::String(s) => {
            if let Ok(n) = s.trim().parse::<f64>() {
                return Some(normalize_epoch(n));
            }
            DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp_millis() as f64 / 1000.0)
        }
        _ => None,
    }
}

fn normalize_epoch(raw: f64) -> f64 {
    if raw.abs() > MILLIS_THRESHOLD {
        raw / 1000.0
    } else {
        raw
    }
}
