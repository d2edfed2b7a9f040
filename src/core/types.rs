//! Point and frame types shared by every pipeline stage.

use serde::{Deserialize, Serialize};

/// One return from the rotating sensor, in sensor-relative polar form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarPoint {
    /// Distance from the sensor origin (meters)
    pub range_m: f32,
    /// Horizontal angle in degrees, expected in [0, 360)
    pub azimuth_deg: f32,
    /// Laser ring that produced the return
    pub ring_index: u16,
    pub intensity: f32,
    pub timestamp_ns: i64,
    pub sensor_id: u32,
}

impl PolarPoint {
    /// Whether the point can be placed into a grid with `rings` rows.
    ///
    /// Ranges must be finite and strictly positive; azimuth must be finite.
    #[inline]
    pub fn is_valid(&self, rings: usize) -> bool {
        self.range_m.is_finite()
            && self.range_m > 0.0
            && self.azimuth_deg.is_finite()
            && (self.ring_index as usize) < rings
    }

    /// Azimuth folded into [0, 360).
    #[inline]
    pub fn normalized_azimuth(&self) -> f32 {
        let az = self.azimuth_deg.rem_euclid(360.0);
        // rem_euclid can round up to exactly 360.0 for tiny negative inputs
        if az >= 360.0 {
            0.0
        } else {
            az
        }
    }
}

/// A point in the shared Cartesian world frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl WorldPoint {
    #[inline]
    pub fn new(x: f32, y: f32, z: f32, intensity: f32) -> Self {
        Self { x, y, z, intensity }
    }

    /// Coordinates as a fixed array, the layout the KD-tree consumes.
    #[inline]
    pub fn coords(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// One complete revolution of points from a single sensor.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sensor_id: u32,
    /// Sequence number assigned by the assembler, starting at 0
    pub frame_index: u64,
    /// Timestamp of the first point in the frame
    pub start_ns: i64,
    /// Timestamp of the last point in the frame
    pub end_ns: i64,
    pub points: Vec<PolarPoint>,
}

impl Frame {
    /// Returns the number of points in the frame.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Build a frame directly from a point list, deriving its time span.
    pub fn from_points(sensor_id: u32, frame_index: u64, points: Vec<PolarPoint>) -> Self {
        let start_ns = points.first().map_or(0, |p| p.timestamp_ns);
        let end_ns = points.last().map_or(start_ns, |p| p.timestamp_ns);
        Self {
            sensor_id,
            frame_index,
            start_ns,
            end_ns,
            points,
        }
    }
}
