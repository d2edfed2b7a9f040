//! Foreground extraction and coordinate transformation.
//!
//! Both stages are pure: the extractor keeps the foreground subset of a frame
//! in input order, and [`SensorTransform`] projects sensor-relative polar
//! points into the shared world frame using the ring elevation table and the
//! fixed mounting pose. The projection is parallelized using Rayon.

use nalgebra::{Rotation3, Vector3};
use rayon::prelude::*;

use super::types::{PolarPoint, WorldPoint};
use crate::config::{ConfigError, SensorConfig, SensorPose};

/// Order-preserving subset of `points` whose mask entry is `true`.
///
/// Entries beyond the shorter of the two slices are ignored.
pub fn extract_foreground(points: &[PolarPoint], mask: &[bool]) -> Vec<PolarPoint> {
    debug_assert_eq!(points.len(), mask.len(), "mask must align with points");

    points
        .iter()
        .zip(mask.iter())
        .filter_map(|(p, &fg)| if fg { Some(*p) } else { None })
        .collect()
}

/// Fixed sensor-to-world projection for one sensor.
///
/// In the sensor frame azimuth is measured from +X toward +Y and elevation
/// from the XY plane; the pose is then applied as `R * p + t`.
#[derive(Debug, Clone)]
pub struct SensorTransform {
    sin_elevation: Vec<f32>,
    cos_elevation: Vec<f32>,
    rotation: Rotation3<f32>,
    translation: Vector3<f32>,
}

impl SensorTransform {
    /// Build the transform for a grid with `rings` rings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the pose contains non-finite values or the
    /// elevation table does not match `rings`.
    pub fn new(sensor: &SensorConfig, rings: usize) -> Result<Self, ConfigError> {
        let elevations = sensor.elevations_deg(rings)?;
        Self::from_parts(&elevations, &sensor.pose)
    }

    pub fn from_parts(elevations_deg: &[f32], pose: &SensorPose) -> Result<Self, ConfigError> {
        let values = [
            pose.translation_m[0],
            pose.translation_m[1],
            pose.translation_m[2],
            pose.roll_deg,
            pose.pitch_deg,
            pose.yaw_deg,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::InvalidPose(format!("non-finite value in {:?}", pose)));
        }
        if elevations_deg.is_empty() {
            return Err(ConfigError::ElevationTable {
                expected: 1,
                found: 0,
            });
        }

        let rotation = Rotation3::from_euler_angles(
            pose.roll_deg.to_radians(),
            pose.pitch_deg.to_radians(),
            pose.yaw_deg.to_radians(),
        );

        Ok(Self {
            sin_elevation: elevations_deg.iter().map(|e| e.to_radians().sin()).collect(),
            cos_elevation: elevations_deg.iter().map(|e| e.to_radians().cos()).collect(),
            rotation,
            translation: Vector3::from(pose.translation_m),
        })
    }

    /// Number of rings covered by the elevation table.
    pub fn rings(&self) -> usize {
        self.sin_elevation.len()
    }

    /// Project one point. Rings outside the table are clamped to the last ring.
    #[inline]
    pub fn to_world(&self, point: &PolarPoint) -> WorldPoint {
        let ring = (point.ring_index as usize).min(self.rings() - 1);
        let az = point.azimuth_deg.to_radians();
        let horizontal = point.range_m * self.cos_elevation[ring];
        let local = Vector3::new(
            horizontal * az.cos(),
            horizontal * az.sin(),
            point.range_m * self.sin_elevation[ring],
        );
        let world = self.rotation * local + self.translation;
        WorldPoint::new(world.x, world.y, world.z, point.intensity)
    }

    /// Project a batch of points, preserving order.
    pub fn to_world_batch(&self, points: &[PolarPoint]) -> Vec<WorldPoint> {
        points.par_iter().map(|p| self.to_world(p)).collect()
    }
}
