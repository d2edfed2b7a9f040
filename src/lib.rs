//! Perception pipeline for a roadside rotating LIDAR.
//!
//! This crate provides tools for:
//! - Learning a per-cell range background and flagging foreground returns
//! - Projecting foreground returns into a shared world frame
//! - DBSCAN clustering of foreground points (parallelized)
//! - Constant-velocity Kalman tracking with Hungarian assignment
//! - Rule-based classification of confirmed tracks
//! - A bounded ingest queue feeding a per-sensor worker thread
//!
//! # Example
//!
//! ```no_run
//! use lidar_pipeline::{core::loaders::load_polar_csv, PipelineConfig, SensorPipeline};
//!
//! let points = load_polar_csv("recording.csv").unwrap();
//! let mut pipeline = SensorPipeline::new(PipelineConfig::default()).unwrap();
//! let results = pipeline.push_points(&points);
//! println!("{} frames", results.len());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{
    BackgroundConfig, ClassificationConfig, ClusteringConfig, ConfigError, IngestConfig,
    PipelineConfig, SensorConfig, TrackingConfig,
};
pub use core::types::{Frame, PolarPoint, WorldPoint};
pub use processors::pipeline::{FrameResult, SensorPipeline};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
