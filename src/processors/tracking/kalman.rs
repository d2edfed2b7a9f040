//! Constant-velocity Kalman filter on the planar state `[x, y, vx, vy]`.
//!
//! - Prediction: `μ' = F × μ`, `Σ' = F × Σ × Fᵀ + Q(dt)`
//! - Innovation covariance: `S = H × Σ × Hᵀ + R`
//! - Kalman gain: `K = Σ × Hᵀ × S⁻¹`
//! - Posterior covariance (Joseph form): `(I - K H) Σ (I - K H)ᵀ + K R Kᵀ`
//!
//! `Q` is the white-acceleration model scaled by `process_noise_accel_var`.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, SymmetricEigen, Vector2, Vector4};
use serde::{Deserialize, Serialize};

use crate::config::TrackingConfig;

/// Mean and covariance of one track's motion state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalmanState {
    pub mean: Vector4<f64>,
    pub covariance: Matrix4<f64>,
}

impl KalmanState {
    #[inline]
    pub fn position(&self) -> [f64; 2] {
        [self.mean[0], self.mean[1]]
    }

    #[inline]
    pub fn velocity(&self) -> [f64; 2] {
        [self.mean[2], self.mean[3]]
    }

    #[inline]
    pub fn speed(&self) -> f64 {
        self.mean[2].hypot(self.mean[3])
    }
}

/// Noise parameters shared by every track of a tracker.
#[derive(Debug, Clone)]
pub struct ConstantVelocityModel {
    accel_var: f64,
    measurement_var: f64,
    initial_velocity_var: f64,
    covariance_floor: f64,
    observation: Matrix2x4<f64>,
}

impl ConstantVelocityModel {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            accel_var: config.process_noise_accel_var,
            measurement_var: config.measurement_noise_var,
            initial_velocity_var: config.initial_velocity_var,
            covariance_floor: config.covariance_floor,
            observation: Matrix2x4::new(
                1.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, 0.0,
            ),
        }
    }

    /// State for a track born at `position` with unknown velocity.
    pub fn initiate(&self, position: [f64; 2]) -> KalmanState {
        KalmanState {
            mean: Vector4::new(position[0], position[1], 0.0, 0.0),
            covariance: self.initial_covariance(),
        }
    }

    fn initial_covariance(&self) -> Matrix4<f64> {
        Matrix4::from_diagonal(&Vector4::new(
            self.measurement_var,
            self.measurement_var,
            self.initial_velocity_var,
            self.initial_velocity_var,
        ))
    }

    fn measurement_noise(&self) -> Matrix2<f64> {
        Matrix2::identity() * self.measurement_var
    }

    /// Propagate the state by `dt` seconds. Non-positive or NaN `dt` is a no-op.
    ///
    /// Returns true if the covariance had to be regularized.
    pub fn predict(&self, state: &mut KalmanState, dt: f64) -> bool {
        if dt.is_nan() || dt <= 0.0 {
            return false;
        }

        let mut transition = Matrix4::identity();
        transition[(0, 2)] = dt;
        transition[(1, 3)] = dt;

        let dt2 = dt * dt;
        let q_pos = dt2 * dt2 / 4.0 * self.accel_var;
        let q_cross = dt2 * dt / 2.0 * self.accel_var;
        let q_vel = dt2 * self.accel_var;
        let process_noise = Matrix4::new(
            q_pos, 0.0, q_cross, 0.0, //
            0.0, q_pos, 0.0, q_cross, //
            q_cross, 0.0, q_vel, 0.0, //
            0.0, q_cross, 0.0, q_vel,
        );

        state.mean = transition * state.mean;
        state.covariance = transition * state.covariance * transition.transpose() + process_noise;
        self.regularize(&mut state.covariance)
    }

    /// Innovation `z - H μ` and its covariance `S`.
    pub fn innovation(&self, state: &KalmanState, measurement: [f64; 2]) -> (Vector2<f64>, Matrix2<f64>) {
        let z = Vector2::new(measurement[0], measurement[1]);
        let residual = z - self.observation * state.mean;
        let s = self.observation * state.covariance * self.observation.transpose() + self.measurement_noise();
        (residual, s)
    }

    /// Squared Mahalanobis distance of a position measurement.
    ///
    /// Returns infinity if the innovation covariance is singular.
    pub fn mahalanobis_sq(&self, state: &KalmanState, measurement: [f64; 2]) -> f64 {
        let (residual, s) = self.innovation(state, measurement);
        match s.try_inverse() {
            Some(s_inv) => residual.dot(&(s_inv * residual)),
            None => f64::INFINITY,
        }
    }

    /// Fuse a position measurement. Returns true if the covariance was regularized.
    pub fn update(&self, state: &mut KalmanState, measurement: [f64; 2]) -> bool {
        let (residual, s) = self.innovation(state, measurement);
        let s_inv = match s.try_inverse() {
            Some(inv) => inv,
            None => {
                log::warn!("singular innovation covariance, skipping update");
                return self.regularize(&mut state.covariance);
            }
        };

        let gain = state.covariance * self.observation.transpose() * s_inv;
        state.mean += gain * residual;

        let identity_minus_kh = Matrix4::identity() - gain * self.observation;
        state.covariance = identity_minus_kh * state.covariance * identity_minus_kh.transpose()
            + gain * self.measurement_noise() * gain.transpose();
        self.regularize(&mut state.covariance)
    }

    /// Keep the covariance symmetric with eigenvalues at or above the floor.
    ///
    /// Returns true when an eigenvalue had to be lifted or the matrix reset.
    pub fn regularize(&self, covariance: &mut Matrix4<f64>) -> bool {
        *covariance = (*covariance + covariance.transpose()) * 0.5;

        if covariance.iter().any(|v| !v.is_finite()) {
            log::warn!("non-finite track covariance, resetting to initial uncertainty");
            *covariance = self.initial_covariance();
            return true;
        }

        let floor = self.covariance_floor;
        let eigen = match SymmetricEigen::try_new(*covariance, f64::EPSILON, 1000) {
            Some(eigen) => eigen,
            None => {
                log::warn!("covariance eigen-decomposition did not converge, resetting");
                *covariance = self.initial_covariance();
                return true;
            }
        };
        if eigen.eigenvalues.iter().all(|&l| l >= floor) {
            return false;
        }

        log::warn!(
            "degenerate track covariance (min eigenvalue {:.3e}), flooring at {:.1e}",
            eigen.eigenvalues.min(),
            floor
        );
        let lifted = eigen.eigenvalues.map(|l| l.max(floor));
        let rebuilt = eigen.eigenvectors * Matrix4::from_diagonal(&lifted) * eigen.eigenvectors.transpose();
        *covariance = (rebuilt + rebuilt.transpose()) * 0.5;
        true
    }
}
