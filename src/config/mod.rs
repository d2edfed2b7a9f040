//! Configuration types for the LIDAR perception pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// Every variant is fatal for the sensor it belongs to: a pipeline is never
/// built from a configuration that failed validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid grid dimensions: {rings} rings x {azimuth_bins} azimuth bins")]
    InvalidGrid { rings: usize, azimuth_bins: usize },

    #[error("Invalid value for `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid sensor pose: {0}")]
    InvalidPose(String),

    #[error("Ring elevation table has {found} entries, grid has {expected} rings")]
    ElevationTable { expected: usize, found: usize },
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

fn check_fraction(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("{} is outside (0, 1]", value)))
    }
}

fn check_positive(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("{} must be finite and > 0", value)))
    }
}

fn check_non_negative(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("{} must be finite and >= 0", value)))
    }
}

/// Mounting pose of the sensor in the shared world frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorPose {
    /// Sensor origin in world coordinates (meters)
    #[serde(default)]
    pub translation_m: [f32; 3],

    /// Rotation about the X axis (degrees)
    #[serde(default)]
    pub roll_deg: f32,

    /// Rotation about the Y axis (degrees)
    #[serde(default)]
    pub pitch_deg: f32,

    /// Rotation about the Z axis (degrees)
    #[serde(default)]
    pub yaw_deg: f32,
}

impl Default for SensorPose {
    fn default() -> Self {
        Self {
            translation_m: [0.0, 0.0, 0.0],
            roll_deg: 0.0,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
        }
    }
}

/// Sensor geometry: identity, ring elevations and mounting pose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Identifier stamped on every frame from this sensor
    #[serde(default)]
    pub sensor_id: u32,

    /// Explicit elevation per ring (degrees). Empty means linear spacing.
    #[serde(default)]
    pub ring_elevations_deg: Vec<f32>,

    /// Elevation of ring 0 when no explicit table is given
    #[serde(default = "default_min_elevation")]
    pub min_elevation_deg: f32,

    /// Elevation of the last ring when no explicit table is given
    #[serde(default = "default_max_elevation")]
    pub max_elevation_deg: f32,

    #[serde(default)]
    pub pose: SensorPose,
}

fn default_min_elevation() -> f32 {
    -16.0
}

fn default_max_elevation() -> f32 {
    7.0
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sensor_id: 0,
            ring_elevations_deg: Vec::new(),
            min_elevation_deg: default_min_elevation(),
            max_elevation_deg: default_max_elevation(),
            pose: SensorPose::default(),
        }
    }
}

impl SensorConfig {
    /// Resolve the per-ring elevation table (degrees) for `rings` rings.
    pub fn elevations_deg(&self, rings: usize) -> Result<Vec<f32>> {
        if !self.ring_elevations_deg.is_empty() {
            if self.ring_elevations_deg.len() != rings {
                return Err(ConfigError::ElevationTable {
                    expected: rings,
                    found: self.ring_elevations_deg.len(),
                });
            }
            if let Some(bad) = self.ring_elevations_deg.iter().find(|e| !e.is_finite()) {
                return Err(invalid("ring_elevations_deg", format!("non-finite entry {}", bad)));
            }
            return Ok(self.ring_elevations_deg.clone());
        }

        if !self.min_elevation_deg.is_finite() || !self.max_elevation_deg.is_finite() {
            return Err(invalid("min_elevation_deg/max_elevation_deg", "must be finite"));
        }

        if rings == 1 {
            return Ok(vec![self.min_elevation_deg]);
        }

        let step = (self.max_elevation_deg - self.min_elevation_deg) / (rings - 1) as f32;
        Ok((0..rings)
            .map(|i| self.min_elevation_deg + step * i as f32)
            .collect())
    }
}

/// Tuning of the adaptive background grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Number of laser rings (grid rows)
    #[serde(default = "default_rings")]
    pub rings: usize,

    /// Number of azimuth bins per revolution (grid columns)
    #[serde(default = "default_azimuth_bins")]
    pub azimuth_bins: usize,

    /// EWMA fraction while a cell is settling or reacquiring
    #[serde(default = "default_background_update_fraction")]
    pub background_update_fraction: f32,

    /// EWMA fraction once a cell is locked
    #[serde(default = "default_post_settle_update_fraction")]
    pub post_settle_update_fraction: f32,

    /// Scale applied to the acceptance window
    #[serde(default = "default_closeness_multiplier")]
    pub closeness_multiplier: f32,

    /// Absolute floor of the acceptance window (meters)
    #[serde(default = "default_safety_margin")]
    pub safety_margin_meters: f32,

    /// Adjacent cells needed to corroborate a point as background; also the
    /// number of consecutive foreground observations counted as sustained occupancy
    #[serde(default = "default_neighbor_confirmation_count")]
    pub neighbor_confirmation_count: u32,

    /// Range-proportional part of the acceptance window
    #[serde(default = "default_noise_relative_fraction")]
    pub noise_relative_fraction: f32,

    /// Seed an empty cell directly from its first observation
    #[serde(default = "default_true")]
    pub seed_from_first_observation: bool,

    /// How long a cell refuses updates after sustained foreground occupancy
    #[serde(default = "default_freeze_duration")]
    pub freeze_duration_nanos: u64,

    /// Minimum wall time of the grid-wide warmup phase
    #[serde(default)]
    pub warmup_duration_nanos: u64,

    /// Minimum number of frames of the grid-wide warmup phase
    #[serde(default = "default_warmup_min_frames")]
    pub warmup_min_frames: u32,

    /// Background observations after which a cell locks
    #[serde(default = "default_lock_after_observations")]
    pub lock_after_observations: u32,

    /// Window widening while settling
    #[serde(default = "default_settling_window_multiplier")]
    pub settling_window_multiplier: f32,

    /// Window widening while reacquiring
    #[serde(default = "default_reacquire_window_multiplier")]
    pub reacquire_window_multiplier: f32,

    /// Observations spent in the reacquire phase before relocking
    #[serde(default = "default_reacquire_observations")]
    pub reacquire_observations: u32,
}

fn default_true() -> bool {
    true
}

fn default_rings() -> usize {
    40
}

fn default_azimuth_bins() -> usize {
    1800
}

fn default_background_update_fraction() -> f32 {
    0.02
}

fn default_post_settle_update_fraction() -> f32 {
    0.002
}

fn default_closeness_multiplier() -> f32 {
    3.0
}

fn default_safety_margin() -> f32 {
    0.4
}

fn default_neighbor_confirmation_count() -> u32 {
    3
}

fn default_noise_relative_fraction() -> f32 {
    0.01
}

fn default_freeze_duration() -> u64 {
    5_000_000_000
}

fn default_warmup_min_frames() -> u32 {
    20
}

fn default_lock_after_observations() -> u32 {
    50
}

fn default_settling_window_multiplier() -> f32 {
    2.0
}

fn default_reacquire_window_multiplier() -> f32 {
    1.5
}

fn default_reacquire_observations() -> u32 {
    10
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            rings: default_rings(),
            azimuth_bins: default_azimuth_bins(),
            background_update_fraction: default_background_update_fraction(),
            post_settle_update_fraction: default_post_settle_update_fraction(),
            closeness_multiplier: default_closeness_multiplier(),
            safety_margin_meters: default_safety_margin(),
            neighbor_confirmation_count: default_neighbor_confirmation_count(),
            noise_relative_fraction: default_noise_relative_fraction(),
            seed_from_first_observation: true,
            freeze_duration_nanos: default_freeze_duration(),
            warmup_duration_nanos: 0,
            warmup_min_frames: default_warmup_min_frames(),
            lock_after_observations: default_lock_after_observations(),
            settling_window_multiplier: default_settling_window_multiplier(),
            reacquire_window_multiplier: default_reacquire_window_multiplier(),
            reacquire_observations: default_reacquire_observations(),
        }
    }
}

impl BackgroundConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rings == 0 || self.azimuth_bins == 0 {
            return Err(ConfigError::InvalidGrid {
                rings: self.rings,
                azimuth_bins: self.azimuth_bins,
            });
        }
        check_fraction("background_update_fraction", self.background_update_fraction)?;
        check_fraction("post_settle_update_fraction", self.post_settle_update_fraction)?;
        check_positive("closeness_multiplier", self.closeness_multiplier)?;
        check_non_negative("safety_margin_meters", self.safety_margin_meters)?;
        check_non_negative("noise_relative_fraction", self.noise_relative_fraction)?;
        check_positive("settling_window_multiplier", self.settling_window_multiplier)?;
        check_positive("reacquire_window_multiplier", self.reacquire_window_multiplier)?;
        if self.safety_margin_meters == 0.0 && self.noise_relative_fraction == 0.0 {
            return Err(invalid(
                "safety_margin_meters",
                "safety margin and noise fraction cannot both be zero",
            ));
        }
        if self.neighbor_confirmation_count == 0 {
            return Err(invalid("neighbor_confirmation_count", "must be >= 1"));
        }
        Ok(())
    }
}

/// Configuration for DBSCAN clustering of foreground points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Neighborhood radius (meters)
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,

    /// Minimum neighborhood size of a core point (the point itself included)
    #[serde(default = "default_min_points")]
    pub min_points: usize,

    /// Foreground points beyond this count are ignored for the frame
    #[serde(default = "default_clustering_max_points")]
    pub max_points: usize,

    /// Clusters larger than this are discarded as clutter
    #[serde(default = "default_max_cluster_points")]
    pub max_cluster_points: usize,

    /// Fit an oriented bounding box per cluster
    #[serde(default = "default_true")]
    pub compute_obb: bool,
}

fn default_epsilon() -> f32 {
    0.6
}

fn default_min_points() -> usize {
    12
}

fn default_clustering_max_points() -> usize {
    200_000
}

fn default_max_cluster_points() -> usize {
    20_000
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            min_points: default_min_points(),
            max_points: default_clustering_max_points(),
            max_cluster_points: default_max_cluster_points(),
            compute_obb: true,
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("epsilon", self.epsilon)?;
        if self.min_points == 0 {
            return Err(invalid("min_points", "must be >= 1"));
        }
        if self.max_points == 0 {
            return Err(invalid("max_points", "must be >= 1"));
        }
        if self.max_cluster_points < self.min_points {
            return Err(invalid(
                "max_cluster_points",
                format!(
                    "{} is smaller than min_points {}",
                    self.max_cluster_points, self.min_points
                ),
            ));
        }
        Ok(())
    }
}

/// Distance used to score track/cluster association hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationMetric {
    /// Planar distance between predicted position and centroid (meters)
    Euclidean,
    /// Squared Mahalanobis distance under the innovation covariance
    Mahalanobis,
}

/// Configuration for the multi-object tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_association_metric")]
    pub association_metric: AssociationMetric,

    /// Euclidean gate (meters)
    #[serde(default = "default_gating_distance")]
    pub gating_distance_m: f64,

    /// Mahalanobis gate (squared distance)
    #[serde(default = "default_gating_mahalanobis_sq")]
    pub gating_mahalanobis_sq: f64,

    /// Consecutive hits promoting a tentative track to confirmed
    #[serde(default = "default_hits_to_confirm")]
    pub hits_to_confirm: u32,

    /// Misses tolerated by a tentative track
    #[serde(default = "default_max_misses_tentative")]
    pub max_misses_tentative: u32,

    /// Misses tolerated by a confirmed track
    #[serde(default = "default_max_misses_confirmed")]
    pub max_misses_confirmed: u32,

    /// Live track cap
    #[serde(default = "default_max_tracks")]
    pub max_tracks: usize,

    /// Deleted tracks retained for export
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// White acceleration noise variance ((m/s^2)^2)
    #[serde(default = "default_process_noise_accel_var")]
    pub process_noise_accel_var: f64,

    /// Centroid measurement noise variance (m^2)
    #[serde(default = "default_measurement_noise_var")]
    pub measurement_noise_var: f64,

    /// Initial velocity variance of a new track ((m/s)^2)
    #[serde(default = "default_initial_velocity_var")]
    pub initial_velocity_var: f64,

    /// Eigenvalue floor applied to degenerate covariances
    #[serde(default = "default_covariance_floor")]
    pub covariance_floor: f64,

    /// Prediction gaps longer than this are clamped (seconds)
    #[serde(default = "default_max_predict_dt")]
    pub max_predict_dt_secs: f64,

    /// EWMA weight of a new bounding box observation
    #[serde(default = "default_bbox_smoothing")]
    pub bbox_smoothing: f32,

    /// EWMA weight of a new OBB heading observation
    #[serde(default = "default_heading_smoothing")]
    pub heading_smoothing: f32,

    /// Below this speed the heading comes from the bounding box (m/s)
    #[serde(default = "default_min_heading_speed")]
    pub min_heading_speed: f32,

    /// Capacity of the per-track speed ring buffer
    #[serde(default = "default_speed_history_len")]
    pub speed_history_len: usize,

    /// Capacity of the per-track position trail
    #[serde(default = "default_trail_len")]
    pub trail_len: usize,
}

fn default_association_metric() -> AssociationMetric {
    AssociationMetric::Euclidean
}

fn default_gating_distance() -> f64 {
    3.0
}

fn default_gating_mahalanobis_sq() -> f64 {
    13.8
}

fn default_hits_to_confirm() -> u32 {
    3
}

fn default_max_misses_tentative() -> u32 {
    3
}

fn default_max_misses_confirmed() -> u32 {
    15
}

fn default_max_tracks() -> usize {
    256
}

fn default_max_history() -> usize {
    1024
}

fn default_process_noise_accel_var() -> f64 {
    4.0
}

fn default_measurement_noise_var() -> f64 {
    0.09
}

fn default_initial_velocity_var() -> f64 {
    25.0
}

fn default_covariance_floor() -> f64 {
    1e-6
}

fn default_max_predict_dt() -> f64 {
    1.0
}

fn default_bbox_smoothing() -> f32 {
    0.3
}

fn default_heading_smoothing() -> f32 {
    0.3
}

fn default_min_heading_speed() -> f32 {
    0.5
}

fn default_speed_history_len() -> usize {
    128
}

fn default_trail_len() -> usize {
    256
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            association_metric: default_association_metric(),
            gating_distance_m: default_gating_distance(),
            gating_mahalanobis_sq: default_gating_mahalanobis_sq(),
            hits_to_confirm: default_hits_to_confirm(),
            max_misses_tentative: default_max_misses_tentative(),
            max_misses_confirmed: default_max_misses_confirmed(),
            max_tracks: default_max_tracks(),
            max_history: default_max_history(),
            process_noise_accel_var: default_process_noise_accel_var(),
            measurement_noise_var: default_measurement_noise_var(),
            initial_velocity_var: default_initial_velocity_var(),
            covariance_floor: default_covariance_floor(),
            max_predict_dt_secs: default_max_predict_dt(),
            bbox_smoothing: default_bbox_smoothing(),
            heading_smoothing: default_heading_smoothing(),
            min_heading_speed: default_min_heading_speed(),
            speed_history_len: default_speed_history_len(),
            trail_len: default_trail_len(),
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.gating_distance_m.is_finite() && self.gating_distance_m > 0.0) {
            return Err(invalid("gating_distance_m", "must be finite and > 0"));
        }
        if !(self.gating_mahalanobis_sq.is_finite() && self.gating_mahalanobis_sq > 0.0) {
            return Err(invalid("gating_mahalanobis_sq", "must be finite and > 0"));
        }
        if self.hits_to_confirm == 0 {
            return Err(invalid("hits_to_confirm", "must be >= 1"));
        }
        if self.max_tracks == 0 {
            return Err(invalid("max_tracks", "must be >= 1"));
        }
        for (name, value) in [
            ("process_noise_accel_var", self.process_noise_accel_var),
            ("measurement_noise_var", self.measurement_noise_var),
            ("initial_velocity_var", self.initial_velocity_var),
            ("covariance_floor", self.covariance_floor),
            ("max_predict_dt_secs", self.max_predict_dt_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(name, format!("{} must be finite and > 0", value)));
            }
        }
        check_fraction("bbox_smoothing", self.bbox_smoothing)?;
        check_fraction("heading_smoothing", self.heading_smoothing)?;
        check_non_negative("min_heading_speed", self.min_heading_speed)?;
        if self.speed_history_len == 0 || self.trail_len == 0 {
            return Err(invalid("speed_history_len/trail_len", "must be >= 1"));
        }
        Ok(())
    }
}

/// Geometric and kinematic envelope of one object class.
///
/// A track scores highest when every feature lies inside its envelope; the
/// score decays linearly with distance outside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassThresholds {
    pub min_length: f32,
    pub max_length: f32,
    pub min_width: f32,
    pub max_width: f32,
    pub min_height: f32,
    pub max_height: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    /// Minimum net/path displacement ratio
    pub min_linearity: f32,
}

fn default_pedestrian() -> ClassThresholds {
    ClassThresholds {
        min_length: 0.2,
        max_length: 1.2,
        min_width: 0.2,
        max_width: 1.2,
        min_height: 1.0,
        max_height: 2.2,
        min_speed: 0.2,
        max_speed: 3.5,
        min_linearity: 0.3,
    }
}

fn default_car() -> ClassThresholds {
    ClassThresholds {
        min_length: 3.0,
        max_length: 6.5,
        min_width: 1.4,
        max_width: 2.6,
        min_height: 1.1,
        max_height: 2.6,
        min_speed: 1.0,
        max_speed: 60.0,
        min_linearity: 0.7,
    }
}

fn default_bird() -> ClassThresholds {
    ClassThresholds {
        min_length: 0.05,
        max_length: 0.8,
        min_width: 0.05,
        max_width: 0.8,
        min_height: 0.05,
        max_height: 0.6,
        min_speed: 0.5,
        max_speed: 25.0,
        min_linearity: 0.0,
    }
}

/// Configuration for the rule-based track classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Observations a confirmed track needs before it is labelled
    #[serde(default = "default_classifier_min_observations")]
    pub min_observations: u32,

    /// Scores below this fall back to `Other`
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Score advantage required to change an existing label
    #[serde(default = "default_switch_margin")]
    pub switch_margin: f32,

    #[serde(default = "default_pedestrian")]
    pub pedestrian: ClassThresholds,

    #[serde(default = "default_car")]
    pub car: ClassThresholds,

    #[serde(default = "default_bird")]
    pub bird: ClassThresholds,
}

fn default_classifier_min_observations() -> u32 {
    5
}

fn default_min_confidence() -> f32 {
    0.5
}

fn default_switch_margin() -> f32 {
    0.1
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            min_observations: default_classifier_min_observations(),
            min_confidence: default_min_confidence(),
            switch_margin: default_switch_margin(),
            pedestrian: default_pedestrian(),
            car: default_car(),
            bird: default_bird(),
        }
    }
}

impl ClassificationConfig {
    pub fn validate(&self) -> Result<()> {
        check_fraction("min_confidence", self.min_confidence)?;
        check_non_negative("switch_margin", self.switch_margin)?;
        for (name, t) in [
            ("pedestrian", &self.pedestrian),
            ("car", &self.car),
            ("bird", &self.bird),
        ] {
            let ordered = t.min_length <= t.max_length
                && t.min_width <= t.max_width
                && t.min_height <= t.max_height
                && t.min_speed <= t.max_speed;
            if !ordered {
                return Err(invalid("classification", format!("{} thresholds have min > max", name)));
            }
        }
        Ok(())
    }
}

/// What the ingest queue does when the pipeline falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// The producer blocks until the queue has room
    Block,
    /// The incoming packet is discarded and counted
    DropNewest,
}

/// Configuration of the bounded queue between point source and pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum queued point packets
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_backpressure")]
    pub backpressure: BackpressurePolicy,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_backpressure() -> BackpressurePolicy {
    BackpressurePolicy::Block
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backpressure: default_backpressure(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub background: BackgroundConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub classification: ClassificationConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file and validate it.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every sub-config; the first violation is returned.
    pub fn validate(&self) -> Result<()> {
        self.background.validate()?;
        self.sensor.elevations_deg(self.background.rings)?;
        self.clustering.validate()?;
        self.tracking.validate()?;
        self.classification.validate()?;
        if self.ingest.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_pipeline_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.background.rings, 40);
        assert_eq!(config.background.azimuth_bins, 1800);
        assert_eq!(config.tracking.max_misses_confirmed, 15);
    }

    #[test]
    fn test_zero_grid_dimensions_rejected() {
        let mut config = PipelineConfig::default();
        config.background.azimuth_bins = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidGrid { rings: 40, azimuth_bins: 0 })
        ));
    }

    #[test]
    fn test_non_positive_epsilon_rejected() {
        let mut config = ClusteringConfig::default();
        config.epsilon = 0.0;
        assert!(config.validate().is_err());
        config.epsilon = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_min_points_rejected() {
        let mut config = ClusteringConfig::default();
        config.min_points = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "min_points", .. })
        ));
    }

    #[test]
    fn test_elevation_table_length_must_match() {
        let mut sensor = SensorConfig::default();
        sensor.ring_elevations_deg = vec![0.0; 16];
        assert!(matches!(
            sensor.elevations_deg(40),
            Err(ConfigError::ElevationTable { expected: 40, found: 16 })
        ));
    }

    #[test]
    fn test_linear_elevations() {
        let sensor = SensorConfig {
            min_elevation_deg: -10.0,
            max_elevation_deg: 10.0,
            ..SensorConfig::default()
        };
        let table = sensor.elevations_deg(3).unwrap();
        assert_eq!(table, vec![-10.0, 0.0, 10.0]);
    }

    #[test]
    fn test_yaml_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pipeline.yaml");

        let mut config = PipelineConfig::default();
        config.clustering.epsilon = 0.5;
        config.ingest.backpressure = BackpressurePolicy::DropNewest;
        config.to_yaml(&path).unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.clustering.epsilon, 0.5);
        assert_eq!(loaded.ingest.backpressure, BackpressurePolicy::DropNewest);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("partial.yaml");
        std::fs::write(&path, "clustering:\n  epsilon: 1.5\n").unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.clustering.epsilon, 1.5);
        assert_eq!(loaded.clustering.min_points, 12);
        assert_eq!(loaded.background.rings, 40);
    }

    #[test]
    fn test_invalid_yaml_is_not_replaced_by_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        std::fs::write(&path, "background:\n  rings: 0\n").unwrap();

        assert!(PipelineConfig::from_yaml(&path).is_err());
    }
}
