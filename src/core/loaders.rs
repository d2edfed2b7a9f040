//! Data loaders for recorded sensor points and exported tracks.
//!
//! This module provides parsers for:
//! - Polar point CSV files (one sensor return per row), used for offline replay
//! - Track JSON files written by [`super::writers::write_tracks_json`]

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use thiserror::Error;

use super::types::PolarPoint;
use crate::processors::tracking::TrackedObject;

/// Columns a polar CSV must provide.
const REQUIRED_COLUMNS: [&str; 4] = ["range_m", "azimuth_deg", "ring_index", "timestamp_ns"];

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// One CSV row; intensity and sensor id are optional columns.
#[derive(Debug, Deserialize)]
struct PolarRecord {
    range_m: f32,
    azimuth_deg: f32,
    ring_index: u16,
    #[serde(default)]
    intensity: f32,
    timestamp_ns: i64,
    #[serde(default)]
    sensor_id: u32,
}

impl From<PolarRecord> for PolarPoint {
    fn from(r: PolarRecord) -> Self {
        PolarPoint {
            range_m: r.range_m,
            azimuth_deg: r.azimuth_deg,
            ring_index: r.ring_index,
            intensity: r.intensity,
            timestamp_ns: r.timestamp_ns,
            sensor_id: r.sensor_id,
        }
    }
}

/// Load polar points from a CSV file with a header row.
///
/// Column names are matched case-insensitively. Rows keep file order, which
/// the frame assembler relies on to detect revolutions. Non-finite ranges are
/// loaded as-is; the background model counts and drops them.
///
/// # Errors
///
/// Returns an error if the file cannot be read, lacks required columns,
/// contains a malformed row or holds no rows at all.
pub fn load_polar_csv<P: AsRef<Path>>(path: P) -> Result<Vec<PolarPoint>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_lowercase()).collect();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == col))
        .collect();
    if !missing.is_empty() {
        return Err(LoaderError::MissingColumns(missing.join(", ")));
    }
    reader.set_headers(csv::StringRecord::from(headers));

    let mut points = Vec::with_capacity(100_000);
    for record in reader.deserialize::<PolarRecord>() {
        points.push(PolarPoint::from(record?));
    }

    if points.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }
    log::debug!("{}: loaded {} points", path.display(), points.len());
    Ok(points)
}

/// Load tracks previously exported as JSON.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a track array.
pub fn load_tracks_json<P: AsRef<Path>>(path: P) -> Result<Vec<TrackedObject>> {
    let file = File::open(path.as_ref())?;
    let tracks: Vec<TrackedObject> = serde_json::from_reader(BufReader::new(file))?;
    Ok(tracks)
}
