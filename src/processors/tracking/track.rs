//! Track record and lifecycle state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::kalman::KalmanState;
use crate::core::stats::{speed_percentiles, SpeedPercentiles};

/// Lifecycle of a track. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Tentative,
    Confirmed,
    Deleted,
}

/// Object category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    #[default]
    Other,
    Pedestrian,
    Car,
    Bird,
}

impl ObjectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Other => "other",
            ObjectClass::Pedestrian => "pedestrian",
            ObjectClass::Car => "car",
            ObjectClass::Bird => "bird",
        }
    }
}

/// Exponentially smoothed object extents.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SmoothedBox {
    pub length: f32,
    pub width: f32,
    pub height: f32,
    /// Footprint heading (radians); only meaningful when `has_heading`
    pub heading: f32,
    pub has_heading: bool,
}

/// One sample of a track's path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    pub x: f32,
    pub y: f32,
    pub timestamp_ns: i64,
}

/// A tracked object and everything observed about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub track_id: u64,
    pub state: TrackState,
    pub kalman: KalmanState,
    /// Consecutive frames with an associated detection
    pub hits: u32,
    /// Consecutive frames without one
    pub misses: u32,
    pub observation_count: u32,
    pub first_seen_ns: i64,
    pub last_seen_ns: i64,
    pub last_predict_ns: i64,
    pub bbox: SmoothedBox,
    /// Smoothed 95th percentile of member heights
    pub height_p95: f32,
    /// Direction of travel (radians)
    pub heading: f32,
    pub speed_history: VecDeque<f32>,
    pub peak_speed: f32,
    pub average_speed: f32,
    pub speed_samples: u64,
    pub path_length_m: f32,
    pub start_position: [f32; 2],
    pub trail: VecDeque<TrailPoint>,
    pub object_class: ObjectClass,
    pub object_confidence: f32,
}

impl TrackedObject {
    pub fn new(track_id: u64, kalman: KalmanState, timestamp_ns: i64) -> Self {
        let [x, y] = kalman.position();
        Self {
            track_id,
            state: TrackState::Tentative,
            kalman,
            hits: 0,
            misses: 0,
            observation_count: 0,
            first_seen_ns: timestamp_ns,
            last_seen_ns: timestamp_ns,
            last_predict_ns: timestamp_ns,
            bbox: SmoothedBox::default(),
            height_p95: 0.0,
            heading: 0.0,
            speed_history: VecDeque::new(),
            peak_speed: 0.0,
            average_speed: 0.0,
            speed_samples: 0,
            path_length_m: 0.0,
            start_position: [x as f32, y as f32],
            trail: VecDeque::new(),
            object_class: ObjectClass::Other,
            object_confidence: 0.0,
        }
    }

    #[inline]
    pub fn position(&self) -> [f32; 2] {
        let [x, y] = self.kalman.position();
        [x as f32, y as f32]
    }

    #[inline]
    pub fn velocity(&self) -> [f32; 2] {
        let [vx, vy] = self.kalman.velocity();
        [vx as f32, vy as f32]
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        self.kalman.speed() as f32
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    /// hits / (hits + misses + 1)
    #[inline]
    pub fn confidence(&self) -> f32 {
        self.hits as f32 / (self.hits + self.misses + 1) as f32
    }

    pub fn speed_percentiles(&self) -> SpeedPercentiles {
        let samples: Vec<f32> = self.speed_history.iter().copied().collect();
        speed_percentiles(&samples)
    }

    /// Straight-line distance from the first to the latest position.
    pub fn net_displacement(&self) -> f32 {
        let [x, y] = self.trail.back().map_or(self.start_position, |p| [p.x, p.y]);
        (x - self.start_position[0]).hypot(y - self.start_position[1])
    }

    /// Net displacement over path length, in [0, 1]; 0 for a track that never moved.
    pub fn linearity(&self) -> f32 {
        if self.path_length_m <= f32::EPSILON {
            return 0.0;
        }
        (self.net_displacement() / self.path_length_m).clamp(0.0, 1.0)
    }

    /// Record a speed sample, keeping at most `capacity` of them.
    pub(crate) fn push_speed(&mut self, speed: f32, capacity: usize) {
        if self.speed_history.len() >= capacity {
            self.speed_history.pop_front();
        }
        self.speed_history.push_back(speed);
        self.peak_speed = self.peak_speed.max(speed);
        self.speed_samples += 1;
        self.average_speed += (speed - self.average_speed) / self.speed_samples as f32;
    }

    /// Append a path sample, accumulating travelled distance.
    pub(crate) fn push_trail(&mut self, point: TrailPoint, capacity: usize) {
        let previous = self
            .trail
            .back()
            .map_or(self.start_position, |p| [p.x, p.y]);
        self.path_length_m += (point.x - previous[0]).hypot(point.y - previous[1]);
        if self.trail.len() >= capacity {
            self.trail.pop_front();
        }
        self.trail.push_back(point);
    }
}
