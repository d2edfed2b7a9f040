//! Data writers for pipeline outputs.
//!
//! This module provides functions for exporting:
//! - Cluster detections as CSV, one row per cluster
//! - Tracks as pretty-printed JSON, readable back with
//!   [`super::loaders::load_tracks_json`]
//! - Per-point foreground masks as CSV

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use super::types::PolarPoint;
use crate::processors::clustering::Cluster;
use crate::processors::tracking::TrackedObject;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// JSON serialization error.
    #[error("JSON write error for '{path}': {source}")]
    JsonError {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Mismatched array lengths.
    #[error("array length mismatch: points has {points_len} elements, mask has {mask_len} elements")]
    LengthMismatch { points_len: usize, mask_len: usize },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Serialize `rows` as CSV with a header derived from the row type.
fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut csv_writer = csv::Writer::from_writer(create_buffered_writer(path)?);
    let path_str = path.display().to_string();

    for row in rows {
        csv_writer.serialize(row).map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })
}

/// Flat CSV layout of a [`Cluster`]; oriented box columns are empty when absent.
#[derive(Serialize)]
struct ClusterRow {
    timestamp_ns: i64,
    cluster_id: u32,
    centroid_x: f32,
    centroid_y: f32,
    centroid_z: f32,
    length: f32,
    width: f32,
    height: f32,
    obb_heading: Option<f32>,
    obb_length: Option<f32>,
    obb_width: Option<f32>,
    point_count: usize,
    height_p95: f32,
    intensity_mean: f32,
}

impl From<&Cluster> for ClusterRow {
    fn from(c: &Cluster) -> Self {
        Self {
            timestamp_ns: c.timestamp_ns,
            cluster_id: c.id,
            centroid_x: c.centroid.x,
            centroid_y: c.centroid.y,
            centroid_z: c.centroid.z,
            length: c.aabb.length,
            width: c.aabb.width,
            height: c.aabb.height,
            obb_heading: c.obb.map(|o| o.heading),
            obb_length: c.obb.map(|o| o.length),
            obb_width: c.obb.map(|o| o.width),
            point_count: c.point_count,
            height_p95: c.height_p95,
            intensity_mean: c.intensity_mean,
        }
    }
}

/// Write cluster detections to CSV, one row per cluster.
///
/// Clusters from many frames can be written together; the `timestamp_ns`
/// column tells them apart.
///
/// # Errors
///
/// Returns an error if:
/// - Parent directories cannot be created
/// - File cannot be created or written to
///
/// # Example
///
/// ```no_run
/// use lidar_pipeline::core::writers::write_clusters_csv;
/// use std::path::Path;
///
/// write_clusters_csv(Path::new("clusters.csv"), &[]).unwrap();
/// ```
pub fn write_clusters_csv(path: &Path, clusters: &[Cluster]) -> Result<()> {
    write_rows(path, clusters.iter().map(ClusterRow::from))
}

/// Write tracks to a pretty-printed JSON array.
///
/// Every field of [`TrackedObject`] is kept, including the filter state, so
/// the file can seed [`crate::processors::tracking::Tracker::restore`].
///
/// # Errors
///
/// Returns an error if:
/// - Parent directories cannot be created
/// - File cannot be created or written to
pub fn write_tracks_json(path: &Path, tracks: &[TrackedObject]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;
    let path_str = path.display().to_string();

    serde_json::to_writer_pretty(&mut writer, tracks).map_err(|e| WriteError::JsonError {
        path: path_str.clone(),
        source: e,
    })?;
    writeln!(writer).map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;

    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })
}

#[derive(Serialize)]
struct MaskRow {
    timestamp_ns: i64,
    ring_index: u16,
    azimuth_deg: f32,
    range_m: f32,
    foreground: u8,
}

/// Write the foreground mask of a frame next to the points it classifies.
///
/// # Errors
///
/// Returns an error if:
/// - `points` and `mask` have different lengths
/// - Parent directories cannot be created
/// - File cannot be created or written to
pub fn write_mask_csv(path: &Path, points: &[PolarPoint], mask: &[bool]) -> Result<()> {
    if points.len() != mask.len() {
        return Err(WriteError::LengthMismatch {
            points_len: points.len(),
            mask_len: mask.len(),
        });
    }

    write_rows(
        path,
        points.iter().zip(mask).map(|(p, &fg)| MaskRow {
            timestamp_ns: p.timestamp_ns,
            ring_index: p.ring_index,
            azimuth_deg: p.azimuth_deg,
            range_m: p.range_m,
            foreground: u8::from(fg),
        }),
    )
}
