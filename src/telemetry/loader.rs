use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use chrono::DateTime;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{RawSample, WeatherConditions};
use crate::errors::LapsyncError;

/// Header that identifies the long (one row per channel reading) CSV layout
const LONG_FORMAT_NAME_COLUMN: &str = "telemetry_name";

/// Parses a timestamp given either as seconds or as an RFC 3339 date-time.
/// Date-times become seconds since the Unix epoch.
pub fn parse_timestamp(value: &str) -> Result<f64, LapsyncError> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<f64>() {
        return Ok(seconds);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1e6)
        .map_err(|_| LapsyncError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Loads raw samples from a JSON-lines or CSV recording, picking the reader
/// from the file extension.
///
/// `vehicle_id` only applies to long-format CSV files, which can hold several
/// cars; when omitted the first vehicle in the file is used.
pub fn load_telemetry(
    source_file: &Path,
    vehicle_id: Option<&str>,
) -> Result<Vec<RawSample>, LapsyncError> {
    if !source_file.is_file() {
        return Err(LapsyncError::InvalidTelemetryFile {
            path: format!("{:?}", source_file),
        });
    }
    let extension = source_file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jsonl") | Some("json") | Some("ndjson") => load_telemetry_jsonl(source_file),
        Some("csv") => load_telemetry_csv(source_file, vehicle_id),
        _ => Err(LapsyncError::InvalidTelemetryFile {
            path: format!("{:?}", source_file),
        }),
    }
}

pub fn load_telemetry_jsonl(source_file: &Path) -> Result<Vec<RawSample>, LapsyncError> {
    let samples = serde_jsonlines::json_lines(source_file)
        .map_err(|e| LapsyncError::TelemetryLoaderError { source: e })?
        .collect::<Result<Vec<RawSample>, std::io::Error>>()
        .map_err(|e| LapsyncError::TelemetryLoaderError { source: e })?;
    info!("Loaded {:?}, found {} samples", source_file, samples.len());
    Ok(samples)
}

/// Reads either a wide CSV (one column per channel, any supported channel
/// name) or the long layout `timestamp,lap,telemetry_name,telemetry_value`.
pub fn load_telemetry_csv(
    source_file: &Path,
    vehicle_id: Option<&str>,
) -> Result<Vec<RawSample>, LapsyncError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(source_file)?;
    let is_long = reader
        .headers()?
        .iter()
        .any(|h| h == LONG_FORMAT_NAME_COLUMN);

    let samples = if is_long {
        pivot_long_rows(reader.deserialize::<LongRow>(), vehicle_id)?
    } else {
        reader
            .deserialize::<RawSample>()
            .collect::<Result<Vec<_>, csv::Error>>()?
    };
    info!(
        "Loaded {:?} ({} layout), found {} samples",
        source_file,
        if is_long { "long" } else { "wide" },
        samples.len()
    );
    Ok(samples)
}

#[derive(Debug, Deserialize)]
struct LongRow {
    timestamp: String,
    #[serde(default)]
    lap: Option<f64>,
    telemetry_name: String,
    telemetry_value: String,
    #[serde(default)]
    vehicle_id: Option<String>,
}

/// Groups long-format readings by (lap, timestamp) into one JSON object per
/// instant and lets the [`RawSample`] schema resolve the channel names.
fn pivot_long_rows(
    rows: impl Iterator<Item = Result<LongRow, csv::Error>>,
    vehicle_id: Option<&str>,
) -> Result<Vec<RawSample>, LapsyncError> {
    let mut selected_vehicle = vehicle_id.map(str::to_string);
    let mut instants: Vec<(u32, f64, Map<String, Value>)> = Vec::new();
    let mut index: HashMap<(u32, u64), usize> = HashMap::new();
    let mut skipped = 0usize;

    for row in rows {
        let row = row?;
        if let Some(vehicle) = row.vehicle_id.as_deref() {
            match selected_vehicle.as_deref() {
                Some(selected) if selected != vehicle => continue,
                Some(_) => {}
                None => {
                    debug!("Using vehicle {} from long-format telemetry", vehicle);
                    selected_vehicle = Some(vehicle.to_string());
                }
            }
        }
        let Ok(value) = row.telemetry_value.parse::<f64>() else {
            skipped += 1;
            continue;
        };
        let timestamp = parse_timestamp(&row.timestamp)?;
        let lap = row.lap.map(|l| l.max(0.0) as u32).unwrap_or(0);

        let slot = *index.entry((lap, timestamp.to_bits())).or_insert_with(|| {
            let mut fields = Map::new();
            fields.insert("lapNumber".to_string(), Value::from(lap));
            fields.insert("timestamp".to_string(), Value::from(timestamp));
            instants.push((lap, timestamp, fields));
            instants.len() - 1
        });
        // First reading wins when a channel repeats at the same instant
        instants[slot]
            .2
            .entry(row.telemetry_name)
            .or_insert_with(|| Value::from(value));
    }
    if skipped > 0 {
        warn!("Skipped {} long-format rows with non-numeric values", skipped);
    }

    instants.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
    instants
        .into_iter()
        .map(|(_, _, fields)| {
            serde_json::from_value::<RawSample>(Value::Object(fields))
                .map_err(|e| LapsyncError::TelemetryLoaderError { source: e.into() })
        })
        .collect()
}

/// Loads session weather from a JSON object or the first row of a CSV file
/// (comma or semicolon separated).
pub fn load_weather(source_file: &Path) -> Result<WeatherConditions, LapsyncError> {
    let is_csv = source_file
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if !is_csv {
        let file =
            File::open(source_file).map_err(|e| LapsyncError::TelemetryLoaderError { source: e })?;
        return serde_json::from_reader(file)
            .map_err(|e| LapsyncError::TelemetryLoaderError { source: e.into() });
    }

    let contents = std::fs::read_to_string(source_file)
        .map_err(|e| LapsyncError::TelemetryLoaderError { source: e })?;
    let delimiter = if contents.lines().next().is_some_and(|h| h.contains(';')) {
        b';'
    } else {
        b','
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());
    match reader.deserialize::<WeatherConditions>().next() {
        Some(row) => Ok(row?),
        None => Err(LapsyncError::InvalidTelemetryFile {
            path: format!("{:?}", source_file),
        }),
    }
}
