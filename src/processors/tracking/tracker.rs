//! Multi-object tracker: prediction, gated Hungarian association, lifecycle.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::hungarian;
use super::kalman::ConstantVelocityModel;
use super::track::{SmoothedBox, TrackState, TrackedObject, TrailPoint};
use crate::config::{AssociationMetric, ConfigError, TrackingConfig};
use crate::core::stats::{align_axis, blend_angle};
use crate::processors::clustering::Cluster;

/// What one tracker update did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingSummary {
    pub matched: usize,
    pub spawned: usize,
    pub confirmed: usize,
    pub deleted: usize,
    pub evicted: usize,
    pub dropped_detections: usize,
    pub active_tracks: usize,
    pub confirmed_tracks: usize,
}

/// Owns every live track of one sensor and the history of deleted ones.
#[derive(Debug, Clone)]
pub struct Tracker {
    config: TrackingConfig,
    model: ConstantVelocityModel,
    tracks: Vec<TrackedObject>,
    history: VecDeque<TrackedObject>,
    next_id: u64,
    dropped_detections: u64,
    evicted_tracks: u64,
    regularizations: u64,
}

impl Tracker {
    /// # Errors
    ///
    /// Returns `ConfigError` if any tracking parameter is out of range.
    pub fn new(config: TrackingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            model: ConstantVelocityModel::new(&config),
            config,
            tracks: Vec::new(),
            history: VecDeque::new(),
            next_id: 1,
            dropped_detections: 0,
            evicted_tracks: 0,
            regularizations: 0,
        })
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Live (tentative and confirmed) tracks in creation order.
    pub fn tracks(&self) -> &[TrackedObject] {
        &self.tracks
    }

    pub(crate) fn tracks_mut(&mut self) -> &mut [TrackedObject] {
        &mut self.tracks
    }

    pub fn confirmed_tracks(&self) -> impl Iterator<Item = &TrackedObject> {
        self.tracks.iter().filter(|t| t.is_confirmed())
    }

    /// Deleted tracks, oldest first.
    pub fn history(&self) -> &VecDeque<TrackedObject> {
        &self.history
    }

    /// Look up a track by id among live tracks and history.
    pub fn track(&self, track_id: u64) -> Option<&TrackedObject> {
        self.tracks
            .iter()
            .chain(self.history.iter())
            .find(|t| t.track_id == track_id)
    }

    /// Id the next spawned track will receive.
    pub fn next_track_id(&self) -> u64 {
        self.next_id
    }

    pub fn dropped_detections(&self) -> u64 {
        self.dropped_detections
    }

    pub fn evicted_tracks(&self) -> u64 {
        self.evicted_tracks
    }

    pub fn regularizations(&self) -> u64 {
        self.regularizations
    }

    /// Reinstate previously exported tracks.
    ///
    /// Deleted tracks go to history, the rest become live again. Id
    /// allocation resumes past the largest id seen so ids are never reused.
    pub fn restore(&mut self, tracks: Vec<TrackedObject>) {
        for track in tracks {
            self.next_id = self.next_id.max(track.track_id + 1);
            if track.state == TrackState::Deleted {
                self.push_history(track);
            } else {
                self.tracks.push(track);
            }
        }
        self.tracks.sort_by_key(|t| t.track_id);
    }

    /// Advance all tracks to `timestamp_ns` and associate this frame's clusters.
    pub fn update(&mut self, clusters: &[Cluster], timestamp_ns: i64) -> TrackingSummary {
        let mut summary = TrackingSummary::default();

        self.predict(timestamp_ns);

        let costs = self.cost_matrix(clusters);
        let assignment = hungarian::solve(&costs);

        let mut cluster_used = vec![false; clusters.len()];
        let mut track_hit = vec![false; self.tracks.len()];
        for (track_idx, cluster_idx) in assignment.into_iter().enumerate() {
            if let Some(cluster_idx) = cluster_idx {
                track_hit[track_idx] = true;
                cluster_used[cluster_idx] = true;
                if self.apply_hit(track_idx, &clusters[cluster_idx], timestamp_ns) {
                    summary.confirmed += 1;
                }
                summary.matched += 1;
            }
        }

        for (track, hit) in self.tracks.iter_mut().zip(track_hit.iter()) {
            if !hit {
                track.misses += 1;
                track.hits = 0;
            }
        }
        summary.deleted = self.remove_expired();

        for (cluster, used) in clusters.iter().zip(cluster_used.iter()) {
            if *used {
                continue;
            }
            if self.tracks.len() >= self.config.max_tracks {
                if self.evict_one() {
                    summary.evicted += 1;
                } else {
                    self.dropped_detections += 1;
                    summary.dropped_detections += 1;
                    log::warn!("track capacity {} reached, detection dropped", self.config.max_tracks);
                    continue;
                }
            }
            self.spawn(cluster, timestamp_ns);
            summary.spawned += 1;
        }

        summary.active_tracks = self.tracks.len();
        summary.confirmed_tracks = self.confirmed_tracks().count();
        log::debug!(
            "tracker @{}: {} matched, {} spawned, {} deleted, {} live",
            timestamp_ns,
            summary.matched,
            summary.spawned,
            summary.deleted,
            summary.active_tracks
        );
        summary
    }

    fn predict(&mut self, timestamp_ns: i64) {
        let max_dt = self.config.max_predict_dt_secs;
        for track in self.tracks.iter_mut() {
            let elapsed_ns = timestamp_ns - track.last_predict_ns;
            if elapsed_ns <= 0 {
                continue;
            }
            let dt = (elapsed_ns as f64 * 1e-9).min(max_dt);
            if self.model.predict(&mut track.kalman, dt) {
                self.regularizations += 1;
            }
            track.last_predict_ns = timestamp_ns;
        }
    }

    /// Rows are live tracks, columns clusters; gated pairs are infinite.
    fn cost_matrix(&self, clusters: &[Cluster]) -> Vec<Vec<f64>> {
        self.tracks
            .iter()
            .map(|track| {
                clusters
                    .iter()
                    .map(|cluster| {
                        let z = [cluster.centroid.x as f64, cluster.centroid.y as f64];
                        match self.config.association_metric {
                            AssociationMetric::Euclidean => {
                                let [px, py] = track.kalman.position();
                                let d = (z[0] - px).hypot(z[1] - py);
                                if d > self.config.gating_distance_m {
                                    f64::INFINITY
                                } else {
                                    d
                                }
                            }
                            AssociationMetric::Mahalanobis => {
                                let d2 = self.model.mahalanobis_sq(&track.kalman, z);
                                if d2 > self.config.gating_mahalanobis_sq {
                                    f64::INFINITY
                                } else {
                                    d2
                                }
                            }
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Fold a matched detection into a track. Returns true if it got confirmed.
    fn apply_hit(&mut self, track_idx: usize, cluster: &Cluster, timestamp_ns: i64) -> bool {
        let config = &self.config;
        let track = &mut self.tracks[track_idx];

        let z = [cluster.centroid.x as f64, cluster.centroid.y as f64];
        if self.model.update(&mut track.kalman, z) {
            self.regularizations += 1;
        }

        smooth_shape(track, cluster, config.bbox_smoothing, config.heading_smoothing);
        track.hits += 1;
        track.misses = 0;
        track.observation_count += 1;
        track.last_seen_ns = timestamp_ns;

        let speed = track.speed();
        track.push_speed(speed, config.speed_history_len);
        track.heading = if speed >= config.min_heading_speed {
            let [vx, vy] = track.velocity();
            vy.atan2(vx)
        } else if track.bbox.has_heading {
            align_axis(track.bbox.heading, track.heading)
        } else {
            track.heading
        };

        let [x, y] = track.position();
        track.push_trail(TrailPoint { x, y, timestamp_ns }, config.trail_len);

        if track.state == TrackState::Tentative && track.hits >= config.hits_to_confirm {
            track.state = TrackState::Confirmed;
            log::info!("track {} confirmed after {} hits", track.track_id, track.hits);
            return true;
        }
        false
    }

    fn spawn(&mut self, cluster: &Cluster, timestamp_ns: i64) {
        let id = self.next_id;
        self.next_id += 1;

        let position = [cluster.centroid.x as f64, cluster.centroid.y as f64];
        let mut track = TrackedObject::new(id, self.model.initiate(position), timestamp_ns);
        track.hits = 1;
        track.observation_count = 1;
        track.bbox = initial_shape(cluster);
        track.height_p95 = cluster.height_p95;
        track.heading = track.bbox.heading;
        track.trail.push_back(TrailPoint {
            x: position[0] as f32,
            y: position[1] as f32,
            timestamp_ns,
        });
        if track.hits >= self.config.hits_to_confirm {
            track.state = TrackState::Confirmed;
        }
        log::debug!("track {} spawned at ({:.2}, {:.2})", id, position[0], position[1]);
        self.tracks.push(track);
    }

    /// Delete tracks whose miss count exceeds the limit for their state.
    fn remove_expired(&mut self) -> usize {
        let max_tentative = self.config.max_misses_tentative;
        let max_confirmed = self.config.max_misses_confirmed;
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tracks)
            .into_iter()
            .partition(|t| match t.state {
                TrackState::Tentative => t.misses > max_tentative,
                TrackState::Confirmed => t.misses > max_confirmed,
                TrackState::Deleted => true,
            });
        self.tracks = live;

        let count = expired.len();
        for track in expired {
            log::debug!("track {} deleted after {} misses", track.track_id, track.misses);
            self.retire(track);
        }
        count
    }

    /// Evict the least trusted tentative track to make room.
    fn evict_one(&mut self) -> bool {
        let victim = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == TrackState::Tentative)
            .min_by(|(_, a), (_, b)| {
                a.confidence()
                    .total_cmp(&b.confidence())
                    .then(a.track_id.cmp(&b.track_id))
            })
            .map(|(idx, _)| idx);

        match victim {
            Some(idx) => {
                let track = self.tracks.remove(idx);
                log::warn!("track capacity reached, evicting tentative track {}", track.track_id);
                self.evicted_tracks += 1;
                self.retire(track);
                true
            }
            None => false,
        }
    }

    fn retire(&mut self, mut track: TrackedObject) {
        track.state = TrackState::Deleted;
        self.push_history(track);
    }

    fn push_history(&mut self, track: TrackedObject) {
        if self.config.max_history == 0 {
            return;
        }
        while self.history.len() >= self.config.max_history {
            self.history.pop_front();
        }
        self.history.push_back(track);
    }
}

fn initial_shape(cluster: &Cluster) -> SmoothedBox {
    let (length, width, heading, has_heading) = match cluster.obb {
        Some(obb) => (obb.length, obb.width, obb.heading, true),
        None => (cluster.aabb.length, cluster.aabb.width, 0.0, false),
    };
    SmoothedBox {
        length,
        width,
        height: cluster.aabb.height,
        heading,
        has_heading,
    }
}

/// EWMA the box extents and the footprint heading toward a new observation.
fn smooth_shape(track: &mut TrackedObject, cluster: &Cluster, alpha: f32, heading_alpha: f32) {
    let observed = initial_shape(cluster);
    let bbox = &mut track.bbox;
    bbox.length += alpha * (observed.length - bbox.length);
    bbox.width += alpha * (observed.width - bbox.width);
    bbox.height += alpha * (observed.height - bbox.height);
    track.height_p95 += alpha * (cluster.height_p95 - track.height_p95);

    if observed.has_heading {
        if bbox.has_heading {
            let aligned = align_axis(observed.heading, bbox.heading);
            bbox.heading = blend_angle(bbox.heading, aligned, heading_alpha);
        } else {
            bbox.heading = observed.heading;
            bbox.has_heading = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::clustering::{Aabb, Centroid, Obb};

    const FRAME_NS: i64 = 100_000_000;

    fn cluster(x: f32, y: f32) -> Cluster {
        Cluster {
            id: 0,
            timestamp_ns: 0,
            centroid: Centroid { x, y, z: 0.8 },
            aabb: Aabb {
                length: 4.2,
                width: 1.8,
                height: 1.5,
            },
            obb: Some(Obb {
                heading: 0.0,
                length: 4.5,
                width: 1.8,
            }),
            point_count: 50,
            height_p95: 1.45,
            intensity_mean: 20.0,
        }
    }

    fn tracker(config: TrackingConfig) -> Tracker {
        Tracker::new(config).unwrap()
    }

    /// Object moving along +X at 0.5 m per frame.
    fn position_at(frame: i64) -> f32 {
        frame as f32 * 0.5
    }

    fn feed(tracker: &mut Tracker, frames: std::ops::Range<i64>, visible: bool) {
        for k in frames {
            let clusters = if visible {
                vec![cluster(position_at(k), 2.0)]
            } else {
                Vec::new()
            };
            tracker.update(&clusters, k * FRAME_NS);
        }
    }

    #[test]
    fn test_confirmation_after_hit_threshold() {
        let mut tracker = tracker(TrackingConfig::default());
        let hits = tracker.config().hits_to_confirm as i64;

        feed(&mut tracker, 0..hits - 1, true);
        assert_eq!(tracker.tracks()[0].state, TrackState::Tentative);

        let summary = tracker.update(&[cluster(position_at(hits - 1), 2.0)], (hits - 1) * FRAME_NS);
        assert_eq!(summary.confirmed, 1);
        assert_eq!(tracker.tracks()[0].state, TrackState::Confirmed);
        assert_eq!(tracker.tracks()[0].track_id, 1);
    }

    #[test]
    fn test_short_occlusion_keeps_identity() {
        let config = TrackingConfig::default();
        let max_miss = config.max_misses_confirmed as i64;
        let mut tracker = tracker(config);

        feed(&mut tracker, 0..30, true);
        feed(&mut tracker, 30..30 + max_miss - 1, false);
        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].misses as i64, max_miss - 1);

        let k = 30 + max_miss - 1;
        let summary = tracker.update(&[cluster(position_at(k), 2.0)], k * FRAME_NS);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.spawned, 0);
        let track = &tracker.tracks()[0];
        assert_eq!(track.track_id, 1);
        assert_eq!(track.misses, 0);
        assert!((track.speed() - 5.0).abs() < 0.5, "speed = {}", track.speed());
    }

    #[test]
    fn test_long_occlusion_deletes_and_never_reuses_id() {
        let config = TrackingConfig::default();
        let max_miss = config.max_misses_confirmed as i64;
        let mut tracker = tracker(config);

        feed(&mut tracker, 0..30, true);
        feed(&mut tracker, 30..30 + max_miss + 1, false);
        assert!(tracker.tracks().is_empty());
        assert_eq!(tracker.history().len(), 1);
        assert_eq!(tracker.history()[0].state, TrackState::Deleted);

        let k = 30 + max_miss + 1;
        tracker.update(&[cluster(position_at(k), 2.0)], k * FRAME_NS);
        assert_eq!(tracker.tracks()[0].track_id, 2);
        assert_eq!(tracker.track(1).map(|t| t.state), Some(TrackState::Deleted));
    }

    #[test]
    fn test_tentative_tracks_expire_quickly() {
        let config = TrackingConfig::default();
        let max_miss = config.max_misses_tentative as i64;
        let mut tracker = tracker(config);

        tracker.update(&[cluster(0.0, 0.0)], 0);
        feed(&mut tracker, 1..max_miss + 2, false);
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn test_gated_detection_spawns_new_track() {
        let mut tracker = tracker(TrackingConfig::default());
        tracker.update(&[cluster(0.0, 0.0)], 0);
        let summary = tracker.update(&[cluster(10.0, 0.0)], FRAME_NS);
        assert_eq!(summary.matched, 0);
        assert_eq!(summary.spawned, 1);
        let ids: Vec<u64> = tracker.tracks().iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_two_objects_keep_their_ids() {
        let mut tracker = tracker(TrackingConfig::default());
        for k in 0..20 {
            let x = k as f32 * 0.3;
            // Present the clusters in alternating order
            let mut clusters = vec![cluster(x, 0.0), cluster(-x, 8.0)];
            if k % 2 == 1 {
                clusters.reverse();
            }
            tracker.update(&clusters, k * FRAME_NS);
        }
        let tracks = tracker.tracks();
        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].position()[1].abs() < 0.5);
        assert!((tracks[1].position()[1] - 8.0).abs() < 0.5);
        assert!(tracks.iter().all(|t| t.observation_count == 20));
    }

    #[test]
    fn test_mahalanobis_association() {
        let mut tracker = tracker(TrackingConfig {
            association_metric: AssociationMetric::Mahalanobis,
            ..TrackingConfig::default()
        });
        feed(&mut tracker, 0..10, true);
        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].observation_count, 10);
    }

    #[test]
    fn test_capacity_evicts_weakest_tentative() {
        let mut tracker = tracker(TrackingConfig {
            max_tracks: 2,
            hits_to_confirm: 5,
            ..TrackingConfig::default()
        });
        tracker.update(&[cluster(0.0, 0.0), cluster(50.0, 0.0)], 0);
        tracker.update(&[cluster(0.0, 0.0)], FRAME_NS);
        let summary = tracker.update(&[cluster(0.0, 0.0), cluster(100.0, 0.0)], 2 * FRAME_NS);

        assert_eq!(summary.evicted, 1);
        let ids: Vec<u64> = tracker.tracks().iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(tracker.history()[0].track_id, 2);
        assert_eq!(tracker.evicted_tracks(), 1);
    }

    #[test]
    fn test_capacity_drops_detection_without_tentative_tracks() {
        let mut tracker = tracker(TrackingConfig {
            max_tracks: 1,
            hits_to_confirm: 1,
            ..TrackingConfig::default()
        });
        tracker.update(&[cluster(0.0, 0.0)], 0);
        assert!(tracker.tracks()[0].is_confirmed());

        let summary = tracker.update(&[cluster(0.0, 0.0), cluster(40.0, 0.0)], FRAME_NS);
        assert_eq!(summary.dropped_detections, 1);
        assert_eq!(tracker.dropped_detections(), 1);
        assert_eq!(tracker.tracks().len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = tracker(TrackingConfig {
            max_history: 2,
            max_misses_tentative: 0,
            ..TrackingConfig::default()
        });
        for k in 0..5 {
            // Each frame spawns a fresh track far from the previous one
            tracker.update(&[cluster(k as f32 * 100.0, 0.0)], k * FRAME_NS);
        }
        assert_eq!(tracker.history().len(), 2);
        assert_eq!(tracker.history()[1].track_id, 4);
    }

    #[test]
    fn test_restore_resumes_ids() {
        let mut source = tracker(TrackingConfig::default());
        feed(&mut source, 0..5, true);
        let exported: Vec<TrackedObject> = source.tracks().to_vec();

        let mut restored = tracker(TrackingConfig::default());
        restored.restore(exported);
        assert_eq!(restored.next_track_id(), 2);
        assert_eq!(restored.tracks()[0], source.tracks()[0]);

        let summary = restored.update(&[cluster(position_at(5), 2.0)], 5 * FRAME_NS);
        assert_eq!(summary.matched, 1);
    }

    #[test]
    fn test_speed_history_holds_measured_samples_only() {
        let mut tracker = tracker(TrackingConfig::default());
        feed(&mut tracker, 0..1, true);
        let track = &tracker.tracks()[0];
        assert!(track.speed_history.is_empty());
        assert_eq!(track.speed_samples, 0);
        assert_eq!(track.average_speed, 0.0);

        feed(&mut tracker, 1..6, true);
        let track = &tracker.tracks()[0];
        assert_eq!(track.speed_history.len(), 5);
        assert_eq!(track.speed_samples, 5);
        assert!(track.speed_history.iter().all(|&s| s > 0.0));
        assert!(track.average_speed > 0.0);
    }

    #[test]
    fn test_speed_statistics_follow_motion() {
        let mut tracker = tracker(TrackingConfig::default());
        feed(&mut tracker, 0..40, true);
        let track = &tracker.tracks()[0];
        let percentiles = track.speed_percentiles();
        assert!((percentiles.p50 - 5.0).abs() < 0.5);
        assert!(track.peak_speed >= percentiles.p95);
        assert!(track.linearity() > 0.95);
        assert!(track.heading.abs() < 0.1);
    }
}
