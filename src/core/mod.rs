//! Core data types, geometry helpers and I/O operations.

pub mod loaders;
pub mod stats;
pub mod transforms;
pub mod types;
pub mod writers;

pub use loaders::{load_polar_csv, load_tracks_json, LoaderError};
pub use stats::{percentile, speed_percentiles, SpeedPercentiles};
pub use transforms::{extract_foreground, SensorTransform};
pub use types::{Frame, PolarPoint, WorldPoint};
pub use writers::{write_clusters_csv, write_mask_csv, write_tracks_json, WriteError};
