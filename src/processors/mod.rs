//! Data processing stages.

pub mod background;
pub mod classification;
pub mod clustering;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod tracking;

// Re-export key types for convenience
pub use background::{BackgroundGrid, CellPhase, GridStats};
pub use classification::{Classifier, TrackFeatures};
pub use clustering::{dbscan, Cluster, Clusterer, NOISE};
pub use frame::FrameAssembler;
pub use ingest::{IngestError, IngestHandle, SharedSnapshot};
pub use pipeline::{FrameResult, PipelineSnapshot, PipelineStats, SensorPipeline};
pub use tracking::{ObjectClass, TrackState, TrackedObject, Tracker, TrackingSummary};
