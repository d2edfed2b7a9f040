//! Rule-based classification of confirmed tracks.
//!
//! Each class is described by an envelope of extents, speed and trajectory
//! linearity. A rule scores a track in [0, 1]: every feature contributes 1
//! inside its envelope and decays linearly with the distance outside it, and
//! the score is the mean of the contributions. Rules are evaluated in a fixed
//! order (bird, pedestrian, car) and the earliest one wins ties.

use serde::{Deserialize, Serialize};

use crate::config::{ClassThresholds, ClassificationConfig, ConfigError};
use crate::processors::tracking::{ObjectClass, TrackedObject};

/// Features a classification decision is based on.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackFeatures {
    pub length: f32,
    pub width: f32,
    pub height: f32,
    pub height_p95: f32,
    pub average_speed: f32,
    pub peak_speed: f32,
    pub p85_speed: f32,
    pub linearity: f32,
}

impl TrackFeatures {
    pub fn from_track(track: &TrackedObject) -> Self {
        Self {
            length: track.bbox.length,
            width: track.bbox.width,
            height: track.bbox.height,
            height_p95: track.height_p95,
            average_speed: track.average_speed,
            peak_speed: track.peak_speed,
            p85_speed: track.speed_percentiles().p85,
            linearity: track.linearity(),
        }
    }
}

/// Membership of `value` in `[min, max]` with a linear fall-off of `tolerance`.
fn band_score(value: f32, min: f32, max: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let tolerance = (0.5 * (max - min)).max(0.05);
    let outside = if value < min {
        min - value
    } else if value > max {
        value - max
    } else {
        0.0
    };
    (1.0 - outside / tolerance).max(0.0)
}

/// One class envelope.
#[derive(Debug, Clone)]
pub struct ClassRule {
    pub class: ObjectClass,
    pub thresholds: ClassThresholds,
}

impl ClassRule {
    pub fn score(&self, features: &TrackFeatures) -> f32 {
        let t = &self.thresholds;
        // Box footprints carry no orientation, so compare the larger side to length
        let (long_side, short_side) = if features.length >= features.width {
            (features.length, features.width)
        } else {
            (features.width, features.length)
        };
        let height = features.height.max(features.height_p95);
        let linearity = if t.min_linearity <= 0.0 || features.linearity >= t.min_linearity {
            1.0
        } else {
            (features.linearity / t.min_linearity).clamp(0.0, 1.0)
        };

        let parts = [
            band_score(long_side, t.min_length, t.max_length),
            band_score(short_side, t.min_width, t.max_width),
            band_score(height, t.min_height, t.max_height),
            band_score(features.p85_speed, t.min_speed, t.max_speed),
            linearity,
        ];
        parts.iter().sum::<f32>() / parts.len() as f32
    }
}

/// Labels confirmed tracks with sufficient history.
#[derive(Debug, Clone)]
pub struct Classifier {
    config: ClassificationConfig,
    rules: Vec<ClassRule>,
}

impl Classifier {
    /// # Errors
    ///
    /// Returns `ConfigError` if a class envelope has min above max or the
    /// confidence settings are out of range.
    pub fn new(config: ClassificationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rules = vec![
            ClassRule {
                class: ObjectClass::Bird,
                thresholds: config.bird.clone(),
            },
            ClassRule {
                class: ObjectClass::Pedestrian,
                thresholds: config.pedestrian.clone(),
            },
            ClassRule {
                class: ObjectClass::Car,
                thresholds: config.car.clone(),
            },
        ];
        Ok(Self { config, rules })
    }

    pub fn rules(&self) -> &[ClassRule] {
        &self.rules
    }

    /// Score of `class` for `features`; `None` for `Other`.
    fn score_of(&self, class: ObjectClass, features: &TrackFeatures) -> Option<f32> {
        self.rules
            .iter()
            .find(|r| r.class == class)
            .map(|r| r.score(features))
    }

    /// Best rule for `features` ignoring hysteresis.
    ///
    /// Returns `(Other, best_score)` when no rule reaches `min_confidence`.
    pub fn evaluate(&self, features: &TrackFeatures) -> (ObjectClass, f32) {
        let mut best = (ObjectClass::Other, 0.0f32);
        for rule in &self.rules {
            let score = rule.score(features);
            // Strict comparison keeps the earliest rule on ties
            if score > best.1 {
                best = (rule.class, score);
            }
        }
        if best.1 >= self.config.min_confidence {
            best
        } else {
            (ObjectClass::Other, best.1)
        }
    }

    /// Decide the label for a track currently labelled `current`.
    pub fn decide(&self, current: ObjectClass, features: &TrackFeatures) -> (ObjectClass, f32) {
        let (candidate, candidate_score) = self.evaluate(features);
        if candidate == current {
            return (candidate, candidate_score);
        }

        match self.score_of(current, features) {
            // Other is replaced as soon as a rule qualifies
            None => (candidate, candidate_score),
            Some(current_score) => {
                let margin = self.config.switch_margin;
                let switch = if candidate == ObjectClass::Other {
                    current_score + margin < self.config.min_confidence
                } else {
                    candidate_score > current_score + margin
                };
                if switch {
                    (candidate, candidate_score)
                } else {
                    (current, current_score)
                }
            }
        }
    }

    /// Classify one track in place. Returns true if its label changed.
    ///
    /// Tentative tracks and tracks with fewer than `min_observations`
    /// observations are left untouched.
    pub fn classify(&self, track: &mut TrackedObject) -> bool {
        if !track.is_confirmed() || track.observation_count < self.config.min_observations {
            return false;
        }

        let features = TrackFeatures::from_track(track);
        let (class, confidence) = self.decide(track.object_class, &features);
        track.object_confidence = confidence;
        if class != track.object_class {
            log::info!(
                "track {} classified as {} ({:.2})",
                track.track_id,
                class.as_str(),
                confidence
            );
            track.object_class = class;
            return true;
        }
        false
    }

    /// Classify every eligible track. Returns how many labels changed.
    pub fn classify_all(&self, tracks: &mut [TrackedObject]) -> usize {
        tracks
            .iter_mut()
            .map(|t| self.classify(t))
            .filter(|&changed| changed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::processors::tracking::{ConstantVelocityModel, TrackState};

    fn classifier() -> Classifier {
        Classifier::new(ClassificationConfig::default()).unwrap()
    }

    fn car_features() -> TrackFeatures {
        TrackFeatures {
            length: 4.5,
            width: 1.8,
            height: 1.5,
            height_p95: 1.45,
            average_speed: 12.0,
            peak_speed: 14.0,
            p85_speed: 13.0,
            linearity: 0.98,
        }
    }

    fn pedestrian_features() -> TrackFeatures {
        TrackFeatures {
            length: 0.6,
            width: 0.5,
            height: 1.7,
            height_p95: 1.7,
            average_speed: 1.4,
            peak_speed: 1.8,
            p85_speed: 1.6,
            linearity: 0.8,
        }
    }

    fn confirmed_track(features: &TrackFeatures, observations: u32) -> TrackedObject {
        let model = ConstantVelocityModel::new(&TrackingConfig::default());
        let mut track = TrackedObject::new(1, model.initiate([0.0, 0.0]), 0);
        track.state = TrackState::Confirmed;
        track.observation_count = observations;
        track.bbox.length = features.length;
        track.bbox.width = features.width;
        track.bbox.height = features.height;
        track.height_p95 = features.height_p95;
        for _ in 0..10 {
            track.push_speed(features.p85_speed, 16);
        }
        track.push_trail(
            crate::processors::tracking::TrailPoint {
                x: 10.0,
                y: 0.0,
                timestamp_ns: 1,
            },
            16,
        );
        track
    }

    #[test]
    fn test_band_score() {
        assert_eq!(band_score(1.0, 0.5, 1.5), 1.0);
        assert_eq!(band_score(2.0, 0.5, 1.5), 0.0);
        assert!((band_score(1.75, 0.5, 1.5) - 0.5).abs() < 1e-6);
        assert_eq!(band_score(f32::NAN, 0.5, 1.5), 0.0);
    }

    #[test]
    fn test_car_and_pedestrian() {
        let c = classifier();
        assert_eq!(c.evaluate(&car_features()).0, ObjectClass::Car);
        assert_eq!(c.evaluate(&pedestrian_features()).0, ObjectClass::Pedestrian);
    }

    #[test]
    fn test_unmatched_shape_is_other() {
        let c = classifier();
        let features = TrackFeatures {
            length: 15.0,
            width: 6.0,
            height: 6.0,
            height_p95: 6.0,
            average_speed: 80.0,
            peak_speed: 90.0,
            p85_speed: 85.0,
            linearity: 0.0,
        };
        assert_eq!(c.evaluate(&features).0, ObjectClass::Other);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let c = classifier();
        let mut track = confirmed_track(&car_features(), 10);
        assert!(c.classify(&mut track));
        let first = (track.object_class, track.object_confidence);
        assert!(!c.classify(&mut track));
        assert_eq!((track.object_class, track.object_confidence), first);
        assert_eq!(track.object_class, ObjectClass::Car);
    }

    #[test]
    fn test_hysteresis_resists_marginal_switch() {
        let c = classifier();
        let features = car_features();
        let car_score = c.rules()[2].score(&features);
        // A current label scoring just under the best candidate is kept
        let (class, _) = c.decide(ObjectClass::Car, &features);
        assert_eq!(class, ObjectClass::Car);
        assert!(car_score >= c.config.min_confidence);

        let (class, _) = c.decide(ObjectClass::Pedestrian, &features);
        assert_eq!(class, ObjectClass::Car, "car outscores pedestrian by far more than the margin");
    }

    #[test]
    fn test_immature_tracks_are_skipped() {
        let c = classifier();
        let mut young = confirmed_track(&car_features(), 2);
        assert!(!c.classify(&mut young));
        assert_eq!(young.object_class, ObjectClass::Other);

        let mut tentative = confirmed_track(&car_features(), 10);
        tentative.state = TrackState::Tentative;
        assert!(!c.classify(&mut tentative));
    }

    #[test]
    fn test_classify_all_counts_changed_labels() {
        let c = classifier();
        let mut tracks = vec![
            confirmed_track(&car_features(), 10),
            confirmed_track(&car_features(), 2),
            confirmed_track(&car_features(), 12),
        ];

        assert_eq!(c.classify_all(&mut tracks), 2);
        assert_eq!(tracks[0].object_class, ObjectClass::Car);
        assert_eq!(tracks[1].object_class, ObjectClass::Other);
        assert_eq!(tracks[2].object_class, ObjectClass::Car);

        // Labels are stable, so a second pass changes nothing
        assert_eq!(c.classify_all(&mut tracks), 0);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = ClassificationConfig::default();
        config.car.min_speed = 100.0;
        assert!(Classifier::new(config).is_err());
    }
}
