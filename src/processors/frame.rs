//! Assembly of streamed points into complete sensor revolutions.
//!
//! A new frame starts when the azimuth wraps around: the previous point was
//! past 270 degrees and the current one is below 90 degrees. The point that
//! triggers the wrap is the first point of the next frame.
//!
//! The buffer is capped. A stream that never wraps, such as a stalled
//! spinner, is cut into frames of at most `max_points` points and each cut
//! is counted.

use crate::core::types::{Frame, PolarPoint};

const WRAP_FROM_DEG: f32 = 270.0;
const WRAP_TO_DEG: f32 = 90.0;

/// Whether moving from `previous` to `current` azimuth closes a revolution.
#[inline]
pub fn is_wraparound(previous_deg: f32, current_deg: f32) -> bool {
    previous_deg > WRAP_FROM_DEG && current_deg < WRAP_TO_DEG
}

/// Buffers the points of one sensor until a revolution completes.
#[derive(Debug)]
pub struct FrameAssembler {
    sensor_id: u32,
    buffer: Vec<PolarPoint>,
    last_azimuth: Option<f32>,
    next_index: u64,
    max_points: usize,
    foreign_points: u64,
    forced_frames: u64,
}

impl FrameAssembler {
    pub fn new(sensor_id: u32, max_points: usize) -> Self {
        Self {
            sensor_id,
            buffer: Vec::new(),
            last_azimuth: None,
            next_index: 0,
            max_points: max_points.max(1),
            foreign_points: 0,
            forced_frames: 0,
        }
    }

    pub fn sensor_id(&self) -> u32 {
        self.sensor_id
    }

    /// Points buffered for the frame in progress.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Points rejected because they came from another sensor.
    pub fn foreign_points(&self) -> u64 {
        self.foreign_points
    }

    /// Frames cut because the buffer filled up without an azimuth wrap.
    pub fn forced_frames(&self) -> u64 {
        self.forced_frames
    }

    /// Add one point; returns the completed frame if this point starts a new one.
    pub fn push(&mut self, point: PolarPoint) -> Option<Frame> {
        if point.sensor_id != self.sensor_id {
            self.foreign_points += 1;
            return None;
        }

        let azimuth = point.normalized_azimuth();
        let completed = match self.last_azimuth {
            Some(previous) if is_wraparound(previous, azimuth) && !self.buffer.is_empty() => self.take_frame(),
            _ if self.buffer.len() >= self.max_points => {
                self.forced_frames += 1;
                if self.forced_frames.is_power_of_two() {
                    log::warn!(
                        "sensor {}: no azimuth wrap within {} points, {} frames cut so far",
                        self.sensor_id,
                        self.max_points,
                        self.forced_frames
                    );
                }
                self.take_frame()
            }
            _ => None,
        };

        // Non-finite azimuths are kept for the grid to count but never move the boundary
        if azimuth.is_finite() {
            self.last_azimuth = Some(azimuth);
        }
        self.buffer.push(point);
        completed
    }

    /// Add a batch of points, returning every frame completed along the way.
    pub fn push_batch(&mut self, points: &[PolarPoint]) -> Vec<Frame> {
        points.iter().filter_map(|p| self.push(*p)).collect()
    }

    /// Emit the partial frame in progress, if any.
    pub fn flush(&mut self) -> Option<Frame> {
        self.last_azimuth = None;
        self.take_frame()
    }

    fn take_frame(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        let points = std::mem::take(&mut self.buffer);
        let frame = Frame::from_points(self.sensor_id, self.next_index, points);
        self.next_index += 1;
        log::trace!("frame {} assembled with {} points", frame.frame_index, frame.len());
        Some(frame)
    }
}
