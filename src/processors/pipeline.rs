//! Synchronous per-sensor pipeline.
//!
//! One [`SensorPipeline`] exclusively owns every stateful stage of a single
//! sensor: frame assembly, background model, clustering, tracking and
//! classification. Each completed frame flows strictly forward through
//!
//! 1. background classification (per-point foreground mask)
//! 2. foreground extraction and projection into the world frame
//! 3. DBSCAN clustering
//! 4. tracker update
//! 5. classification of confirmed tracks

use serde::Serialize;

use super::background::{BackgroundGrid, GridStats};
use super::classification::Classifier;
use super::clustering::{Cluster, Clusterer};
use super::frame::FrameAssembler;
use super::tracking::{TrackedObject, Tracker, TrackingSummary};
use crate::config::{ConfigError, PipelineConfig};
use crate::core::transforms::{extract_foreground, SensorTransform};
use crate::core::types::{Frame, PolarPoint};

/// Frame buffer limit as a multiple of the grid's cells per revolution.
const FRAME_CAPACITY_FACTOR: usize = 4;

/// Everything produced for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameResult {
    pub sensor_id: u32,
    pub frame_index: u64,
    pub timestamp_ns: i64,
    /// Foreground flag per input point, aligned with the frame's points
    pub mask: Vec<bool>,
    pub point_count: usize,
    pub foreground_count: usize,
    pub clusters: Vec<Cluster>,
    pub tracking: TrackingSummary,
    pub labels_changed: usize,
}

/// Cumulative counters of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub points_processed: u64,
    pub foreign_points: u64,
    pub forced_frames: u64,
    pub truncated_points: u64,
    pub oversized_clusters: u64,
    pub dropped_detections: u64,
    pub evicted_tracks: u64,
    pub covariance_regularizations: u64,
    pub active_tracks: usize,
    pub confirmed_tracks: usize,
    pub history_tracks: usize,
    pub grid: GridStats,
}

/// Read-only view of the latest pipeline state, published to external readers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSnapshot {
    pub sensor_id: u32,
    pub frame_index: u64,
    pub timestamp_ns: i64,
    pub foreground_count: usize,
    pub clusters: Vec<Cluster>,
    pub active_tracks: Vec<TrackedObject>,
    pub stats: PipelineStats,
    pub dropped_packets: u64,
}

#[derive(Debug)]
pub struct SensorPipeline {
    config: PipelineConfig,
    assembler: FrameAssembler,
    grid: BackgroundGrid,
    transform: SensorTransform,
    clusterer: Clusterer,
    tracker: Tracker,
    classifier: Classifier,
    frames_processed: u64,
    points_processed: u64,
}

impl SensorPipeline {
    /// Build every stage from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found; no stage falls back to defaults.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let grid = BackgroundGrid::new(config.background.clone())?;
        let transform = SensorTransform::new(&config.sensor, config.background.rings)?;
        let clusterer = Clusterer::new(config.clustering.clone())?;
        let tracker = Tracker::new(config.tracking.clone())?;
        let classifier = Classifier::new(config.classification.clone())?;

        log::info!(
            "sensor {} pipeline ready: {}x{} grid, eps={} min_points={}",
            config.sensor.sensor_id,
            config.background.rings,
            config.background.azimuth_bins,
            config.clustering.epsilon,
            config.clustering.min_points
        );

        Ok(Self {
            assembler: FrameAssembler::new(
                config.sensor.sensor_id,
                config.background.rings * config.background.azimuth_bins * FRAME_CAPACITY_FACTOR,
            ),
            grid,
            transform,
            clusterer,
            tracker,
            classifier,
            config,
            frames_processed: 0,
            points_processed: 0,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sensor_id(&self) -> u32 {
        self.config.sensor.sensor_id
    }

    pub fn grid(&self) -> &BackgroundGrid {
        &self.grid
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }

    /// Run one complete frame through every stage.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameResult {
        let timestamp_ns = frame.start_ns;

        let mask = self.grid.classify_frame(&frame.points, timestamp_ns);
        let foreground = extract_foreground(&frame.points, &mask);
        let world = self.transform.to_world_batch(&foreground);
        let clusters = self.clusterer.cluster(&world, timestamp_ns);
        let tracking = self.tracker.update(&clusters, timestamp_ns);
        let labels_changed = self.classifier.classify_all(self.tracker.tracks_mut());

        self.frames_processed += 1;
        self.points_processed += frame.len() as u64;

        log::debug!(
            "frame {}: {} points, {} foreground, {} clusters, {} tracks",
            frame.frame_index,
            frame.len(),
            foreground.len(),
            clusters.len(),
            tracking.active_tracks
        );

        FrameResult {
            sensor_id: frame.sensor_id,
            frame_index: frame.frame_index,
            timestamp_ns,
            point_count: frame.len(),
            foreground_count: foreground.len(),
            mask,
            clusters,
            tracking,
            labels_changed,
        }
    }

    /// Feed streamed points; every frame they complete is processed.
    pub fn push_points(&mut self, points: &[PolarPoint]) -> Vec<FrameResult> {
        let frames = self.assembler.push_batch(points);
        frames.iter().map(|f| self.process_frame(f)).collect()
    }

    /// Process the partial frame still buffered, if any.
    pub fn finish(&mut self) -> Option<FrameResult> {
        let frame = self.assembler.flush()?;
        log::debug!("finalizing partial frame {} ({} points)", frame.frame_index, frame.len());
        Some(self.process_frame(&frame))
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_processed: self.frames_processed,
            points_processed: self.points_processed,
            foreign_points: self.assembler.foreign_points(),
            forced_frames: self.assembler.forced_frames(),
            truncated_points: self.clusterer.truncated_points(),
            oversized_clusters: self.clusterer.oversized_clusters(),
            dropped_detections: self.tracker.dropped_detections(),
            evicted_tracks: self.tracker.evicted_tracks(),
            covariance_regularizations: self.tracker.regularizations(),
            active_tracks: self.tracker.tracks().len(),
            confirmed_tracks: self.tracker.confirmed_tracks().count(),
            history_tracks: self.tracker.history().len(),
            grid: self.grid.stats(),
        }
    }

    /// Capture the state external readers see after `result`.
    pub fn snapshot(&self, result: &FrameResult) -> PipelineSnapshot {
        PipelineSnapshot {
            sensor_id: self.sensor_id(),
            frame_index: result.frame_index,
            timestamp_ns: result.timestamp_ns,
            foreground_count: result.foreground_count,
            clusters: result.clusters.clone(),
            active_tracks: self.tracker.tracks().to_vec(),
            stats: self.stats(),
            dropped_packets: 0,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{BackgroundConfig, ClusteringConfig, SensorConfig, TrackingConfig};
    use crate::processors::tracking::TrackState;

    pub(crate) const RINGS: usize = 8;
    pub(crate) const BINS: usize = 360;
    pub(crate) const FRAME_NS: i64 = 100_000_000;
    const WALL_RANGE: f32 = 30.0;

    pub(crate) fn test_config() -> PipelineConfig {
        PipelineConfig {
            sensor: SensorConfig {
                min_elevation_deg: -10.0,
                max_elevation_deg: 4.0,
                ..SensorConfig::default()
            },
            background: BackgroundConfig {
                rings: RINGS,
                azimuth_bins: BINS,
                warmup_min_frames: 5,
                ..BackgroundConfig::default()
            },
            clustering: ClusteringConfig {
                epsilon: 1.0,
                min_points: 4,
                ..ClusteringConfig::default()
            },
            tracking: TrackingConfig {
                gating_distance_m: 4.0,
                ..TrackingConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    /// One revolution of a static 30 m wall, optionally with an object
    /// occupying `object_bins` at `object_range`.
    pub(crate) fn revolution(index: i64, object: Option<(std::ops::Range<usize>, f32)>) -> Vec<PolarPoint> {
        let start = index * FRAME_NS;
        let mut points = Vec::with_capacity(RINGS * BINS);
        for bin in 0..BINS {
            for ring in 0..RINGS {
                let range = match &object {
                    Some((bins, range)) if bins.contains(&bin) => *range,
                    _ => WALL_RANGE,
                };
                points.push(PolarPoint {
                    range_m: range,
                    azimuth_deg: bin as f32 + 0.5,
                    ring_index: ring as u16,
                    intensity: 20.0,
                    timestamp_ns: start + (bin as i64 * FRAME_NS) / BINS as i64,
                    sensor_id: 0,
                });
            }
        }
        points
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.clustering.epsilon = -1.0;
        assert!(SensorPipeline::new(config).is_err());

        let mut config = test_config();
        config.sensor.ring_elevations_deg = vec![0.0; 3];
        assert!(matches!(
            SensorPipeline::new(config),
            Err(ConfigError::ElevationTable { .. })
        ));
    }

    #[test]
    fn test_static_scene_produces_nothing() {
        let mut pipeline = SensorPipeline::new(test_config()).unwrap();
        for k in 0..10 {
            let frame = Frame::from_points(0, k as u64, revolution(k, None));
            let result = pipeline.process_frame(&frame);
            assert_eq!(result.mask.len(), frame.len());
            assert_eq!(result.foreground_count, 0);
            assert!(result.clusters.is_empty());
        }
        assert!(pipeline.tracker().tracks().is_empty());
    }

    #[test]
    fn test_moving_object_is_tracked() {
        let mut pipeline = SensorPipeline::new(test_config()).unwrap();
        for k in 0..6 {
            pipeline.process_frame(&Frame::from_points(0, k as u64, revolution(k, None)));
        }

        // Object at 10 m sweeping one degree per frame
        let mut last = None;
        for k in 6..16 {
            let first_bin = 40 + (k - 6) as usize;
            let points = revolution(k, Some((first_bin..first_bin + 6, 10.0)));
            let result = pipeline.process_frame(&Frame::from_points(0, k as u64, points));
            assert_eq!(result.clusters.len(), 1, "frame {}", k);
            last = Some(result);
        }

        let result = last.unwrap();
        assert_eq!(result.tracking.active_tracks, 1);
        let track = &pipeline.tracker().tracks()[0];
        assert_eq!(track.state, TrackState::Confirmed);
        assert_eq!(track.track_id, 1);
        assert_eq!(track.observation_count, 10);
    }

    #[test]
    fn test_streamed_points_match_frame_processing() {
        let mut streamed = SensorPipeline::new(test_config()).unwrap();
        let mut points = Vec::new();
        for k in 0..4 {
            points.extend(revolution(k, None));
        }
        let results = streamed.push_points(&points);
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].frame_index, 2);

        let tail = streamed.finish().unwrap();
        assert_eq!(tail.frame_index, 3);
        assert_eq!(tail.point_count, RINGS * BINS);
        assert!(streamed.finish().is_none());

        let stats = streamed.stats();
        assert_eq!(stats.frames_processed, 4);
        assert_eq!(stats.points_processed, 4 * (RINGS * BINS) as u64);
        assert_eq!(stats.forced_frames, 0);
    }

    #[test]
    fn test_invalid_points_are_counted() {
        let mut pipeline = SensorPipeline::new(test_config()).unwrap();
        let mut points = revolution(0, None);
        points[0].range_m = f32::NAN;
        points[1].ring_index = 200;
        let result = pipeline.process_frame(&Frame::from_points(0, 0, points));
        assert!(!result.mask[0] && !result.mask[1]);
        assert_eq!(pipeline.stats().grid.invalid_points, 2);
    }
}
