//! Multi-object tracking over per-frame cluster detections.

pub mod hungarian;
pub mod kalman;
pub mod track;
pub mod tracker;

pub use kalman::{ConstantVelocityModel, KalmanState};
pub use track::{ObjectClass, SmoothedBox, TrackState, TrackedObject, TrailPoint};
pub use tracker::{Tracker, TrackingSummary};
