//! Small numeric helpers: percentiles and angle arithmetic.
//!
//! Percentiles use linear interpolation between closest ranks: for a sorted
//! sample of length `n` the rank of percentile `p` (0..=100) is
//! `p / 100 * (n - 1)`, and the value is interpolated between the samples
//! at `floor(rank)` and `ceil(rank)`. With `[1, 2, 3, 4, 5]` this gives
//! p50 = 3, p85 = 4.4 and p95 = 4.8.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Speed percentiles of one track (m/s).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeedPercentiles {
    pub p50: f32,
    pub p85: f32,
    pub p95: f32,
}

/// Percentile of an already sorted slice. Returns `None` for empty input.
pub fn percentile_sorted(sorted: &[f32], p: f32) -> Option<f32> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let weight = rank - lower as f32;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Percentile of an unsorted sample. Non-finite values are ignored.
pub fn percentile(samples: &[f32], p: f32) -> Option<f32> {
    let mut sorted: Vec<f32> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f32::total_cmp);
    percentile_sorted(&sorted, p)
}

/// p50/p85/p95 of a speed sample.
///
/// Pure and deterministic; an empty (or all non-finite) sample yields zeros.
pub fn speed_percentiles(samples: &[f32]) -> SpeedPercentiles {
    let mut sorted: Vec<f32> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f32::total_cmp);
    SpeedPercentiles {
        p50: percentile_sorted(&sorted, 50.0).unwrap_or(0.0),
        p85: percentile_sorted(&sorted, 85.0).unwrap_or(0.0),
        p95: percentile_sorted(&sorted, 95.0).unwrap_or(0.0),
    }
}

/// Wrap an angle into (-PI, PI].
#[inline]
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Move `current` toward `target` by `alpha`, along the shortest arc.
#[inline]
pub fn blend_angle(current: f32, target: f32, alpha: f32) -> f32 {
    wrap_angle(current + alpha * wrap_angle(target - current))
}

/// Choose between `heading` and `heading + PI`, whichever is closer to `reference`.
///
/// Bounding box axes carry no direction, so an observed box heading is
/// ambiguous by half a turn.
#[inline]
pub fn align_axis(heading: f32, reference: f32) -> f32 {
    let flipped = wrap_angle(heading + PI);
    if wrap_angle(heading - reference).abs() <= wrap_angle(flipped - reference).abs() {
        wrap_angle(heading)
    } else {
        flipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_percentiles_one_to_five() {
        let result = speed_percentiles(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(result.p50, 3.0);
        assert!((result.p85 - 4.4).abs() < 1e-6);
        assert!((result.p95 - 4.8).abs() < 1e-6);
    }

    #[test]
    fn test_speed_percentiles_order_independent() {
        let a = speed_percentiles(&[5.0, 1.0, 4.0, 2.0, 3.0]);
        let b = speed_percentiles(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_speed_percentiles_empty() {
        assert_eq!(speed_percentiles(&[]), SpeedPercentiles::default());
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_percentile_single_and_non_finite() {
        assert_eq!(percentile(&[7.0], 95.0), Some(7.0));
        assert_eq!(percentile(&[f32::NAN, 2.0, 4.0], 50.0), Some(3.0));
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(3.0 * PI).abs() - PI).abs() < 1e-5);
        assert!((wrap_angle(-PI / 2.0) + PI / 2.0).abs() < 1e-6);
        assert!(wrap_angle(-PI) > 0.0);
    }

    #[test]
    fn test_blend_angle_takes_short_arc() {
        let blended = blend_angle(PI - 0.1, -PI + 0.1, 0.5);
        assert!(blended.abs() > 3.0);
    }

    #[test]
    fn test_align_axis_flips_to_reference() {
        let aligned = align_axis(0.1, PI);
        assert!((aligned - wrap_angle(0.1 + PI)).abs() < 1e-6);
        assert!((align_axis(0.1, 0.0) - 0.1).abs() < 1e-6);
    }
}
