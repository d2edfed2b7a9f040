//! Parallel DBSCAN clustering of foreground world points.
//!
//! This module implements a parallelized DBSCAN using:
//! - `kiddo` KD-tree for O(log n) spatial neighbor queries
//! - `rayon` for parallel neighbor finding and per-cluster feature extraction
//! - Atomic union-find for lock-free cluster merging
//!
//! Labelling is deterministic regardless of thread scheduling: neighbor lists
//! are sorted by index, border points join their lowest-index core neighbor,
//! and cluster ids follow the order of each cluster's first core point.
//!
//! # Example
//!
//! ```no_run
//! use lidar_pipeline::processors::clustering::dbscan;
//!
//! let coords = vec![[0.0f32, 0.0, 0.0], [0.1, 0.0, 0.0], [100.0, 100.0, 100.0]];
//! let labels = dbscan(&coords, 0.5, 2);
//! assert_eq!(labels, vec![0, 0, -1]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ClusteringConfig, ConfigError};
use crate::core::stats::percentile;
use crate::core::types::WorldPoint;

/// Label of points that belong to no cluster.
pub const NOISE: i32 = -1;

/// Atomic Union-Find data structure for lock-free parallel cluster merging.
///
/// Uses path compression with atomic compare-and-swap operations to safely
/// merge clusters from multiple threads without locks.
pub struct AtomicUnionFind {
    parent: Vec<AtomicUsize>,
}

impl AtomicUnionFind {
    /// Create a new union-find structure where each element is its own parent.
    #[inline]
    pub fn new(size: usize) -> Self {
        let parent = (0..size).map(AtomicUsize::new).collect();
        Self { parent }
    }

    /// Find the root of the set containing `x` with path compression.
    ///
    /// Relaxed ordering suffices: roots only ever move upward, so every
    /// reader converges to the same root once all unions have completed.
    #[inline]
    pub fn find(&self, mut x: usize) -> usize {
        loop {
            let p = self.parent[x].load(Ordering::Relaxed);
            if p == x {
                return x;
            }
            let gp = self.parent[p].load(Ordering::Relaxed);
            if gp != p {
                // Losing this race to a concurrent update is harmless
                let _ = self.parent[x].compare_exchange_weak(p, gp, Ordering::Relaxed, Ordering::Relaxed);
            }
            x = p;
        }
    }

    /// Union the sets containing `x` and `y`.
    ///
    /// Returns true if a merge actually occurred, false if they were already
    /// in the same set.
    #[inline]
    pub fn union(&self, x: usize, y: usize) -> bool {
        loop {
            let root_x = self.find(x);
            let root_y = self.find(y);

            if root_x == root_y {
                return false;
            }

            // Smaller root always points to the larger one
            let (small, large) = if root_x < root_y {
                (root_x, root_y)
            } else {
                (root_y, root_x)
            };

            if self.parent[small]
                .compare_exchange_weak(small, large, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// DBSCAN over 3D coordinates.
///
/// A point is core when its `epsilon` neighborhood, the point itself
/// included, holds at least `min_points` members. Core points that are
/// neighbors share a cluster; non-core points join the cluster of their
/// lowest-index core neighbor. Clusters left with fewer than `min_points`
/// members after border assignment are demoted to noise.
///
/// # Algorithm (Parallelized)
///
/// 1. **Build KD-tree**: O(n log n) construction using kiddo
/// 2. **Parallel neighbor finding**: rayon fan-out of radius queries
/// 3. **Lock-free cluster formation**: atomic union-find over core pairs
/// 4. **Label assignment**: sequential pass in input order
///
/// # Returns
///
/// One label per input point; [`NOISE`] for unclustered points, otherwise
/// dense ids starting at 0.
pub fn dbscan(coords: &[[f32; 3]], epsilon: f32, min_points: usize) -> Vec<i32> {
    let n = coords.len();
    if n == 0 {
        return Vec::new();
    }
    let min_points = min_points.max(1);

    let tree: ImmutableKdTree<f32, 3> = ImmutableKdTree::new_from_slice(coords);
    let eps_sq = epsilon * epsilon;

    let neighbors: Vec<Vec<usize>> = coords
        .par_iter()
        .map(|coord| {
            let mut found: Vec<usize> = tree
                .within::<SquaredEuclidean>(coord, eps_sq)
                .iter()
                .map(|nn| nn.item as usize)
                .collect();
            found.sort_unstable();
            found
        })
        .collect();

    let is_core: Vec<bool> = neighbors
        .par_iter()
        .map(|neigh| neigh.len() >= min_points)
        .collect();

    let uf = AtomicUnionFind::new(n);
    (0..n).into_par_iter().for_each(|i| {
        if is_core[i] {
            for &j in &neighbors[i] {
                if j > i && is_core[j] {
                    uf.union(i, j);
                }
            }
        }
    });

    // Ids in order of each cluster's first core point
    let mut root_to_cluster: HashMap<usize, i32> = HashMap::new();
    let mut labels = vec![NOISE; n];
    for i in 0..n {
        if is_core[i] {
            let next = root_to_cluster.len() as i32;
            labels[i] = *root_to_cluster.entry(uf.find(i)).or_insert(next);
        }
    }
    for i in 0..n {
        if !is_core[i] {
            if let Some(&j) = neighbors[i].iter().find(|&&j| is_core[j]) {
                labels[i] = labels[j];
            }
        }
    }

    demote_small_clusters(&mut labels, root_to_cluster.len(), min_points);
    labels
}

/// Relabel clusters smaller than `min_points` as noise and compact the ids.
fn demote_small_clusters(labels: &mut [i32], cluster_count: usize, min_points: usize) {
    let mut sizes = vec![0usize; cluster_count];
    for &label in labels.iter() {
        if label >= 0 {
            sizes[label as usize] += 1;
        }
    }
    if sizes.iter().all(|&s| s >= min_points) {
        return;
    }

    let mut remap = vec![NOISE; cluster_count];
    let mut next = 0;
    for (id, &size) in sizes.iter().enumerate() {
        if size >= min_points {
            remap[id] = next;
            next += 1;
        }
    }
    for label in labels.iter_mut() {
        if *label >= 0 {
            *label = remap[*label as usize];
        }
    }
}

/// Cluster centroid in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Axis-aligned extents: length along X, width along Y, height along Z.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aabb {
    pub length: f32,
    pub width: f32,
    pub height: f32,
}

/// Oriented footprint from PCA of the XY coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Obb {
    /// Principal axis angle in (-PI/2, PI/2]
    pub heading: f32,
    pub length: f32,
    pub width: f32,
}

/// One per-frame object detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Dense per-frame id
    pub id: u32,
    pub timestamp_ns: i64,
    pub centroid: Centroid,
    pub aabb: Aabb,
    pub obb: Option<Obb>,
    pub point_count: usize,
    pub height_p95: f32,
    pub intensity_mean: f32,
}

impl Cluster {
    /// Compute the features of a non-empty member set.
    pub fn from_points(id: u32, timestamp_ns: i64, members: &[WorldPoint], compute_obb: bool) -> Self {
        let n = members.len().max(1) as f64;
        let (mut sx, mut sy, mut sz, mut si) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];

        for p in members {
            sx += p.x as f64;
            sy += p.y as f64;
            sz += p.z as f64;
            si += p.intensity as f64;
            for (axis, v) in p.coords().iter().enumerate() {
                min[axis] = min[axis].min(*v);
                max[axis] = max[axis].max(*v);
            }
        }

        let centroid = Centroid {
            x: (sx / n) as f32,
            y: (sy / n) as f32,
            z: (sz / n) as f32,
        };
        let aabb = if members.is_empty() {
            Aabb::default()
        } else {
            Aabb {
                length: max[0] - min[0],
                width: max[1] - min[1],
                height: max[2] - min[2],
            }
        };

        let heights: Vec<f32> = members.iter().map(|p| p.z).collect();
        let obb = if compute_obb && members.len() >= 2 {
            Some(oriented_box(members, &centroid))
        } else {
            None
        };

        Self {
            id,
            timestamp_ns,
            centroid,
            aabb,
            obb,
            point_count: members.len(),
            height_p95: percentile(&heights, 95.0).unwrap_or(0.0),
            intensity_mean: (si / n) as f32,
        }
    }
}

/// PCA of the XY footprint; extents measured along the principal axes.
fn oriented_box(members: &[WorldPoint], centroid: &Centroid) -> Obb {
    let (mut cxx, mut cyy, mut cxy) = (0.0f64, 0.0f64, 0.0f64);
    for p in members {
        let dx = (p.x - centroid.x) as f64;
        let dy = (p.y - centroid.y) as f64;
        cxx += dx * dx;
        cyy += dy * dy;
        cxy += dx * dy;
    }

    let mut heading = (0.5 * (2.0 * cxy).atan2(cxx - cyy)) as f32;
    if heading <= -std::f32::consts::FRAC_PI_2 {
        heading += std::f32::consts::PI;
    }
    let (sin, cos) = heading.sin_cos();

    let mut along = (f32::INFINITY, f32::NEG_INFINITY);
    let mut across = (f32::INFINITY, f32::NEG_INFINITY);
    for p in members {
        let dx = p.x - centroid.x;
        let dy = p.y - centroid.y;
        let u = dx * cos + dy * sin;
        let v = -dx * sin + dy * cos;
        along = (along.0.min(u), along.1.max(u));
        across = (across.0.min(v), across.1.max(v));
    }

    Obb {
        heading,
        length: along.1 - along.0,
        width: across.1 - across.0,
    }
}

/// Frame-level clustering stage with its input and output guards.
#[derive(Debug, Clone)]
pub struct Clusterer {
    config: ClusteringConfig,
    truncated_points: u64,
    oversized_clusters: u64,
}

impl Clusterer {
    /// # Errors
    ///
    /// Returns `ConfigError` for non-positive `epsilon` or zero `min_points`.
    pub fn new(config: ClusteringConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            truncated_points: 0,
            oversized_clusters: 0,
        })
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Points ignored because a frame exceeded `max_points`.
    pub fn truncated_points(&self) -> u64 {
        self.truncated_points
    }

    /// Clusters discarded because they exceeded `max_cluster_points`.
    pub fn oversized_clusters(&self) -> u64 {
        self.oversized_clusters
    }

    /// Cluster one frame of world points.
    pub fn cluster(&mut self, points: &[WorldPoint], timestamp_ns: i64) -> Vec<Cluster> {
        self.cluster_labeled(points, timestamp_ns).1
    }

    /// Cluster one frame and also return the per-point labels.
    ///
    /// Labels align with `points`; points past `max_points` and members of
    /// discarded clusters are labelled [`NOISE`].
    pub fn cluster_labeled(&mut self, points: &[WorldPoint], timestamp_ns: i64) -> (Vec<i32>, Vec<Cluster>) {
        if points.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let used = points.len().min(self.config.max_points);
        if used < points.len() {
            let dropped = points.len() - used;
            self.truncated_points += dropped as u64;
            log::warn!("clustering input truncated: {} points over max_points", dropped);
        }

        let coords: Vec<[f32; 3]> = points[..used].iter().map(WorldPoint::coords).collect();
        let mut labels = dbscan(&coords, self.config.epsilon, self.config.min_points);
        labels.resize(points.len(), NOISE);

        let cluster_count = labels.iter().copied().max().map_or(0, |m| (m + 1) as usize);
        let mut members: Vec<Vec<WorldPoint>> = vec![Vec::new(); cluster_count];
        for (point, &label) in points.iter().zip(labels.iter()) {
            if label >= 0 {
                members[label as usize].push(*point);
            }
        }

        // Drop oversized clusters and keep the surviving ids dense
        let max_size = self.config.max_cluster_points;
        let mut remap = vec![NOISE; cluster_count];
        let mut kept: Vec<Vec<WorldPoint>> = Vec::with_capacity(cluster_count);
        for (id, group) in members.into_iter().enumerate() {
            if group.len() > max_size {
                self.oversized_clusters += 1;
                log::debug!("discarding cluster of {} points", group.len());
            } else {
                remap[id] = kept.len() as i32;
                kept.push(group);
            }
        }
        for label in labels.iter_mut() {
            if *label >= 0 {
                *label = remap[*label as usize];
            }
        }

        let compute_obb = self.config.compute_obb;
        let clusters: Vec<Cluster> = kept
            .par_iter()
            .enumerate()
            .map(|(id, group)| Cluster::from_points(id as u32, timestamp_ns, group, compute_obb))
            .collect();

        log::debug!("{} foreground points -> {} clusters", points.len(), clusters.len());
        (labels, clusters)
    }
}
