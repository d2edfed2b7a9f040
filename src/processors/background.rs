//! Adaptive polar background model.
//!
//! The sensor's field of view is divided into `rings x azimuth_bins` cells.
//! Each cell keeps an exponentially weighted estimate of the range at which
//! the static scene is seen, plus a spread estimate, and moves through these
//! phases:
//!
//! - **Warmup**: grid-wide, while fewer than `warmup_min_frames` frames (and
//!   less than `warmup_duration_nanos`) have been seen. Every valid point is
//!   background and trains its cell.
//! - **Settling**: wide acceptance window, fast update fraction.
//! - **Locked**: after `lock_after_observations` background hits; nominal
//!   window, slow `post_settle_update_fraction`.
//! - **Frozen**: after `neighbor_confirmation_count` consecutive foreground
//!   observations the cell ignores updates for `freeze_duration_nanos`, so a
//!   stopped vehicle is not learned into the background right away.
//! - **Reacquire**: if the occupancy outlasts the freeze, the cell re-seeds
//!   from the new range and spends `reacquire_observations` observations with
//!   a relaxed window before returning to its previous phase.

use serde::Serialize;

use crate::config::{BackgroundConfig, ConfigError};
use crate::core::types::PolarPoint;

/// Azimuth-bin offsets of the cells consulted for neighbor corroboration.
const NEIGHBOR_OFFSETS: [isize; 4] = [-2, -1, 1, 2];

/// Lifecycle phase of a single cell, derived from its counters and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellPhase {
    Empty,
    Warmup,
    Settling,
    Locked,
    Frozen,
    Reacquire,
}

/// Online range statistics of one (ring, azimuth bin) cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackgroundCell {
    pub ewma_range: f32,
    pub ewma_spread: f32,
    /// Background observations absorbed into the estimate
    pub times_seen: u32,
    /// The cell refuses updates until this timestamp
    pub frozen_until_ns: i64,
    pub locked: bool,
    pub last_update_ns: i64,
    consecutive_foreground: u32,
    reacquire_remaining: u32,
    pending_reacquire: bool,
}

impl BackgroundCell {
    #[inline]
    pub fn is_frozen(&self, now_ns: i64) -> bool {
        now_ns < self.frozen_until_ns
    }

    pub fn phase(&self, now_ns: i64, grid_in_warmup: bool) -> CellPhase {
        if self.times_seen == 0 {
            CellPhase::Empty
        } else if grid_in_warmup {
            CellPhase::Warmup
        } else if self.is_frozen(now_ns) {
            CellPhase::Frozen
        } else if self.reacquire_remaining > 0 {
            CellPhase::Reacquire
        } else if self.locked {
            CellPhase::Locked
        } else {
            CellPhase::Settling
        }
    }

    /// Largest deviation from the estimate still accepted as background.
    fn threshold(&self, range_m: f32, phase: CellPhase, config: &BackgroundConfig) -> f32 {
        let base = config
            .safety_margin_meters
            .max(config.noise_relative_fraction * range_m)
            .max(self.ewma_spread);
        let phase_multiplier = match phase {
            CellPhase::Settling | CellPhase::Warmup => config.settling_window_multiplier,
            CellPhase::Reacquire => config.reacquire_window_multiplier,
            _ => 1.0,
        };
        base * config.closeness_multiplier * phase_multiplier
    }

    fn seed(&mut self, range_m: f32, now_ns: i64) {
        self.ewma_range = range_m;
        self.ewma_spread = 0.0;
        self.times_seen = 1;
        self.last_update_ns = now_ns;
    }

    fn absorb(&mut self, range_m: f32, fraction: f32, now_ns: i64) {
        let deviation = (range_m - self.ewma_range).abs();
        self.ewma_range += fraction * (range_m - self.ewma_range);
        self.ewma_spread += fraction * (deviation - self.ewma_spread);
        self.times_seen = self.times_seen.saturating_add(1);
        self.last_update_ns = now_ns;
    }

    fn reacquire(&mut self, range_m: f32, now_ns: i64, observations: u32) {
        self.ewma_range = range_m;
        self.ewma_spread = 0.0;
        self.times_seen = self.times_seen.saturating_add(1);
        self.last_update_ns = now_ns;
        self.frozen_until_ns = 0;
        self.consecutive_foreground = 0;
        self.pending_reacquire = false;
        self.reacquire_remaining = observations;
    }
}

/// Counters describing the grid and its recent activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GridStats {
    pub rings: usize,
    pub azimuth_bins: usize,
    pub frames_processed: u64,
    pub in_warmup: bool,
    pub cells_seen: usize,
    pub cells_locked: usize,
    pub cells_frozen: usize,
    pub invalid_points: u64,
    pub foreground_points: u64,
    pub background_points: u64,
    pub freeze_events: u64,
    pub reacquire_events: u64,
}

/// Per-sensor background model. Exclusively owned by one pipeline.
#[derive(Debug, Clone)]
pub struct BackgroundGrid {
    config: BackgroundConfig,
    cells: Vec<BackgroundCell>,
    frames_processed: u64,
    first_frame_ns: Option<i64>,
    last_frame_ns: i64,
    invalid_points: u64,
    foreground_points: u64,
    background_points: u64,
    freeze_events: u64,
    reacquire_events: u64,
}

impl BackgroundGrid {
    /// Create an empty grid.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for zero dimensions or out-of-range tuning values.
    pub fn new(config: BackgroundConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cells = vec![BackgroundCell::default(); config.rings * config.azimuth_bins];
        log::debug!(
            "background grid: {} rings x {} bins ({} cells)",
            config.rings,
            config.azimuth_bins,
            cells.len()
        );
        Ok(Self {
            config,
            cells,
            frames_processed: 0,
            first_frame_ns: None,
            last_frame_ns: 0,
            invalid_points: 0,
            foreground_points: 0,
            background_points: 0,
            freeze_events: 0,
            reacquire_events: 0,
        })
    }

    #[inline]
    pub fn rings(&self) -> usize {
        self.config.rings
    }

    #[inline]
    pub fn azimuth_bins(&self) -> usize {
        self.config.azimuth_bins
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn invalid_points(&self) -> u64 {
        self.invalid_points
    }

    /// Cell at (`ring`, `bin`), if inside the grid.
    pub fn cell(&self, ring: usize, bin: usize) -> Option<&BackgroundCell> {
        if ring < self.rings() && bin < self.azimuth_bins() {
            Some(&self.cells[ring * self.azimuth_bins() + bin])
        } else {
            None
        }
    }

    /// Azimuth bin of an angle already folded into [0, 360).
    #[inline]
    pub fn azimuth_bin(&self, azimuth_deg: f32) -> usize {
        let bins = self.azimuth_bins();
        let bin = (azimuth_deg / 360.0 * bins as f32) as usize;
        bin.min(bins - 1)
    }

    /// Whether a frame starting at `frame_ns` falls into the warmup phase.
    pub fn in_warmup(&self, frame_ns: i64) -> bool {
        if self.frames_processed < self.config.warmup_min_frames as u64 {
            return true;
        }
        // A zero duration means the frame count alone decides
        if self.config.warmup_duration_nanos == 0 {
            return false;
        }
        match self.first_frame_ns {
            Some(first) => {
                let elapsed = frame_ns.saturating_sub(first).max(0) as u64;
                elapsed < self.config.warmup_duration_nanos
            }
            None => true,
        }
    }

    /// Classify every point of a frame and train the model.
    ///
    /// The returned mask is aligned 1:1 with `points`; `true` marks
    /// foreground. Invalid points are counted, never flagged.
    pub fn classify_frame(&mut self, points: &[PolarPoint], frame_ns: i64) -> Vec<bool> {
        let warmup = self.in_warmup(frame_ns);
        if self.first_frame_ns.is_none() {
            self.first_frame_ns = Some(frame_ns);
        }

        let mask: Vec<bool> = points
            .iter()
            .map(|p| self.classify_point(p, warmup))
            .collect();

        self.frames_processed += 1;
        self.last_frame_ns = frame_ns;

        if warmup && !self.in_warmup(frame_ns) {
            log::info!(
                "background warmup complete after {} frames",
                self.frames_processed
            );
        }

        mask
    }

    fn classify_point(&mut self, point: &PolarPoint, warmup: bool) -> bool {
        if !point.is_valid(self.rings()) {
            self.invalid_points += 1;
            return false;
        }

        let ring = point.ring_index as usize;
        let bin = self.azimuth_bin(point.normalized_azimuth());
        let idx = ring * self.azimuth_bins() + bin;
        let range = point.range_m;
        let now = point.timestamp_ns;

        let foreground = if warmup {
            self.train_warmup(idx, range, now);
            false
        } else {
            self.classify_settled(idx, ring, bin, range, now)
        };

        if foreground {
            self.foreground_points += 1;
        } else {
            self.background_points += 1;
        }
        foreground
    }

    fn train_warmup(&mut self, idx: usize, range: f32, now: i64) {
        let fraction = self.config.background_update_fraction;
        let seed = self.config.seed_from_first_observation;
        let cell = &mut self.cells[idx];
        if cell.times_seen == 0 {
            cell.seed(range, now);
        } else if !seed && cell.times_seen < 10 {
            // Without explicit seeding the first few samples form a running mean
            let weight = 1.0 / (cell.times_seen + 1) as f32;
            cell.absorb(range, weight.max(fraction), now);
        } else {
            cell.absorb(range, fraction, now);
        }
    }

    fn classify_settled(&mut self, idx: usize, ring: usize, bin: usize, range: f32, now: i64) -> bool {
        let config = &self.config;

        if self.cells[idx].times_seen == 0 {
            // First sighting after warmup: trust it only when seeding is enabled
            self.cells[idx].seed(range, now);
            return !config.seed_from_first_observation;
        }

        let cell = &self.cells[idx];
        let phase = cell.phase(now, false);
        let deviation = (range - cell.ewma_range).abs();

        if deviation <= cell.threshold(range, phase, config) {
            let fraction = match phase {
                CellPhase::Locked => config.post_settle_update_fraction,
                _ => config.background_update_fraction,
            };
            let lock_after = config.lock_after_observations;
            let cell = &mut self.cells[idx];
            cell.consecutive_foreground = 0;
            if phase == CellPhase::Frozen {
                return false;
            }
            cell.pending_reacquire = false;
            cell.absorb(range, fraction, now);
            if phase == CellPhase::Reacquire {
                cell.reacquire_remaining -= 1;
            }
            if !cell.locked && cell.times_seen >= lock_after {
                cell.locked = true;
            }
            return false;
        }

        if self.neighbor_support(ring, bin, range, now) >= config.neighbor_confirmation_count {
            self.cells[idx].consecutive_foreground = 0;
            return false;
        }

        let sustained = config.neighbor_confirmation_count;
        let freeze = config.freeze_duration_nanos;
        let reacquire_observations = config.reacquire_observations;
        let cell = &mut self.cells[idx];

        if cell.is_frozen(now) {
            return true;
        }

        cell.consecutive_foreground += 1;
        if cell.consecutive_foreground < sustained {
            return true;
        }

        if freeze > 0 && !cell.pending_reacquire {
            cell.frozen_until_ns = now.saturating_add(freeze.min(i64::MAX as u64) as i64);
            cell.pending_reacquire = true;
            self.freeze_events += 1;
            return true;
        }

        cell.reacquire(range, now, reacquire_observations);
        self.reacquire_events += 1;
        false
    }

    /// Adjacent cells on the same ring whose own estimate accepts `range`.
    fn neighbor_support(&self, ring: usize, bin: usize, range: f32, now: i64) -> u32 {
        let bins = self.azimuth_bins() as isize;
        let row = ring * self.azimuth_bins();
        let mut support = 0;

        for offset in NEIGHBOR_OFFSETS {
            let neighbor_bin = (bin as isize + offset).rem_euclid(bins) as usize;
            if neighbor_bin == bin {
                continue;
            }
            let neighbor = &self.cells[row + neighbor_bin];
            if neighbor.times_seen == 0 {
                continue;
            }
            let phase = neighbor.phase(now, false);
            let deviation = (range - neighbor.ewma_range).abs();
            if deviation <= neighbor.threshold(range, phase, &self.config) {
                support += 1;
            }
        }
        support
    }

    pub fn stats(&self) -> GridStats {
        let now = self.last_frame_ns;
        GridStats {
            rings: self.rings(),
            azimuth_bins: self.azimuth_bins(),
            frames_processed: self.frames_processed,
            in_warmup: self.in_warmup(now),
            cells_seen: self.cells.iter().filter(|c| c.times_seen > 0).count(),
            cells_locked: self.cells.iter().filter(|c| c.locked).count(),
            cells_frozen: self.cells.iter().filter(|c| c.is_frozen(now)).count(),
            invalid_points: self.invalid_points,
            foreground_points: self.foreground_points,
            background_points: self.background_points,
            freeze_events: self.freeze_events,
            reacquire_events: self.reacquire_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_NS: i64 = 100_000_000;

    fn point(range_m: f32, azimuth_deg: f32, ring_index: u16, timestamp_ns: i64) -> PolarPoint {
        PolarPoint {
            range_m,
            azimuth_deg,
            ring_index,
            intensity: 1.0,
            timestamp_ns,
            sensor_id: 0,
        }
    }

    /// One return per cell of a `rings x bins` grid at a fixed range.
    fn full_frame(rings: usize, bins: usize, range_m: f32, ts: i64) -> Vec<PolarPoint> {
        let step = 360.0 / bins as f32;
        let mut points = Vec::with_capacity(rings * bins);
        for ring in 0..rings {
            for bin in 0..bins {
                points.push(point(range_m, (bin as f32 + 0.5) * step, ring as u16, ts));
            }
        }
        points
    }

    fn small_config() -> BackgroundConfig {
        BackgroundConfig {
            rings: 4,
            azimuth_bins: 36,
            warmup_min_frames: 5,
            closeness_multiplier: 1.0,
            settling_window_multiplier: 1.0,
            safety_margin_meters: 0.3,
            noise_relative_fraction: 0.01,
            neighbor_confirmation_count: 3,
            freeze_duration_nanos: 0,
            ..BackgroundConfig::default()
        }
    }

    fn warm_up(grid: &mut BackgroundGrid, range_m: f32, frames: usize) -> i64 {
        let (rings, bins) = (grid.rings(), grid.azimuth_bins());
        let mut ts = 0;
        for _ in 0..frames {
            let frame = full_frame(rings, bins, range_m, ts);
            grid.classify_frame(&frame, ts);
            ts += FRAME_NS;
        }
        ts
    }

    #[test]
    fn test_invalid_dimensions_rejected() {
        let config = BackgroundConfig {
            rings: 0,
            ..BackgroundConfig::default()
        };
        assert!(matches!(
            BackgroundGrid::new(config),
            Err(ConfigError::InvalidGrid { .. })
        ));
    }

    #[test]
    fn test_mask_aligned_with_input() {
        let mut grid = BackgroundGrid::new(small_config()).unwrap();
        let mut frame = full_frame(4, 36, 10.0, 0);
        frame.push(point(f32::NAN, 10.0, 0, 0));
        frame.push(point(5.0, 10.0, 99, 0));
        let mask = grid.classify_frame(&frame, 0);
        assert_eq!(mask.len(), frame.len());
        assert_eq!(grid.invalid_points(), 2);
    }

    #[test]
    fn test_warmup_accepts_everything() {
        let mut grid = BackgroundGrid::new(small_config()).unwrap();
        for (i, range) in [10.0, 3.0, 25.0].iter().enumerate() {
            let ts = i as i64 * FRAME_NS;
            let mask = grid.classify_frame(&full_frame(4, 36, *range, ts), ts);
            assert!(mask.iter().all(|&fg| !fg));
        }
        assert!(grid.in_warmup(3 * FRAME_NS));
    }

    #[test]
    fn test_zero_warmup_settings_skip_warmup() {
        let mut grid = BackgroundGrid::new(BackgroundConfig {
            warmup_min_frames: 0,
            warmup_duration_nanos: 0,
            ..small_config()
        })
        .unwrap();
        assert!(!grid.in_warmup(0));
        grid.classify_frame(&full_frame(4, 36, 10.0, 0), 0);
        assert!(!grid.stats().in_warmup);
        assert_eq!(grid.frames_processed(), 1);
    }

    #[test]
    fn test_duration_only_warmup() {
        let mut grid = BackgroundGrid::new(BackgroundConfig {
            warmup_min_frames: 0,
            warmup_duration_nanos: 2 * FRAME_NS as u64,
            ..small_config()
        })
        .unwrap();
        assert!(grid.in_warmup(0));
        warm_up(&mut grid, 10.0, 2);
        assert!(grid.in_warmup(FRAME_NS));
        assert!(!grid.in_warmup(2 * FRAME_NS));
    }

    #[test]
    fn test_identical_range_after_warmup_is_background() {
        // 40 rings x 1800 bins, 50 identical warmup frames
        let config = BackgroundConfig {
            warmup_min_frames: 50,
            ..BackgroundConfig::default()
        };
        let mut grid = BackgroundGrid::new(config).unwrap();
        let ts = warm_up(&mut grid, 12.5, 50);
        assert!(!grid.in_warmup(ts));

        for i in 0..3 {
            let t = ts + i * FRAME_NS;
            let mask = grid.classify_frame(&full_frame(40, 1800, 12.5, t), t);
            assert_eq!(mask.len(), 40 * 1800);
            assert!(mask.iter().all(|&fg| !fg));
        }
    }

    #[test]
    fn test_single_deviation_is_foreground() {
        let mut grid = BackgroundGrid::new(small_config()).unwrap();
        let ts = warm_up(&mut grid, 20.0, 5);

        let mut frame = full_frame(4, 36, 20.0, ts);
        let target = 36 + 10; // ring 1, bin 10
        frame[target].range_m = 12.0;
        let mask = grid.classify_frame(&frame, ts);

        assert!(mask[target]);
        assert_eq!(mask.iter().filter(|&&fg| fg).count(), 1);
    }

    #[test]
    fn test_persistent_deviation_reacquires() {
        let mut grid = BackgroundGrid::new(small_config()).unwrap();
        let mut ts = warm_up(&mut grid, 20.0, 5);
        let target = 36 + 10;
        let count = grid.config().neighbor_confirmation_count as usize;

        let mut flags = Vec::new();
        for _ in 0..count + 2 {
            let mut frame = full_frame(4, 36, 20.0, ts);
            frame[target].range_m = 12.0;
            flags.push(grid.classify_frame(&frame, ts)[target]);
            ts += FRAME_NS;
        }

        // Flagged until the deviation has persisted `count` frames, then absorbed
        assert!(flags[..count - 1].iter().all(|&fg| fg));
        assert!(flags[count - 1..].iter().all(|&fg| !fg));
        assert_eq!(grid.stats().reacquire_events, 1);

        let cell = grid.cell(1, 10).unwrap();
        assert!((cell.ewma_range - 12.0).abs() < 1e-3);
    }

    #[test]
    fn test_freeze_delays_reacquisition() {
        let config = BackgroundConfig {
            freeze_duration_nanos: 1_000_000_000,
            ..small_config()
        };
        let mut grid = BackgroundGrid::new(config).unwrap();
        let mut ts = warm_up(&mut grid, 20.0, 5);
        let freeze_start = ts + 2 * FRAME_NS;
        let target = 10;

        let mut flags = Vec::new();
        while ts <= freeze_start + 1_000_000_000 {
            let mut frame = full_frame(4, 36, 20.0, ts);
            frame[target].range_m = 8.0;
            flags.push((ts, grid.classify_frame(&frame, ts)[target]));
            ts += FRAME_NS;
        }

        let (last_ts, last_flag) = *flags.last().unwrap();
        assert_eq!(last_ts, freeze_start + 1_000_000_000);
        assert!(!last_flag, "cell should reacquire once the freeze expires");
        assert!(flags[..flags.len() - 1].iter().all(|&(_, fg)| fg));
        assert_eq!(grid.stats().freeze_events, 1);
    }

    #[test]
    fn test_frozen_cell_does_not_learn_background() {
        let config = BackgroundConfig {
            freeze_duration_nanos: 10_000_000_000,
            ..small_config()
        };
        let mut grid = BackgroundGrid::new(config).unwrap();
        let mut ts = warm_up(&mut grid, 20.0, 5);
        let target = 10;

        for _ in 0..3 {
            let mut frame = full_frame(4, 36, 20.0, ts);
            frame[target].range_m = 8.0;
            grid.classify_frame(&frame, ts);
            ts += FRAME_NS;
        }
        let before = grid.cell(0, 10).unwrap().times_seen;
        assert_eq!(grid.cell(0, 10).unwrap().phase(ts, false), CellPhase::Frozen);

        let mask = grid.classify_frame(&full_frame(4, 36, 20.0, ts), ts);
        assert!(!mask[target]);
        assert_eq!(grid.cell(0, 10).unwrap().times_seen, before);
    }

    #[test]
    fn test_neighbor_corroboration_suppresses_foreground() {
        let mut grid = BackgroundGrid::new(small_config()).unwrap();
        // Alternate ranges so bin 10 learns 20 m while its neighbors learn 12 m
        let mut ts = 0;
        for _ in 0..5 {
            let mut frame = full_frame(4, 36, 12.0, ts);
            frame[10].range_m = 20.0;
            grid.classify_frame(&frame, ts);
            ts += FRAME_NS;
        }

        let mut frame = full_frame(4, 36, 12.0, ts);
        frame[10].range_m = 12.0;
        let mask = grid.classify_frame(&frame, ts);
        assert!(!mask[10], "neighbors at 12 m corroborate the return");
    }

    #[test]
    fn test_unseen_cell_without_seeding_is_foreground_once() {
        let config = BackgroundConfig {
            seed_from_first_observation: false,
            ..small_config()
        };
        let mut grid = BackgroundGrid::new(config).unwrap();
        let mut ts = 0;
        for _ in 0..5 {
            let frame: Vec<PolarPoint> = full_frame(4, 36, 20.0, ts)
                .into_iter()
                .filter(|p| p.ring_index != 3)
                .collect();
            grid.classify_frame(&frame, ts);
            ts += FRAME_NS;
        }

        let first = grid.classify_frame(&[point(9.0, 5.0, 3, ts)], ts);
        ts += FRAME_NS;
        let second = grid.classify_frame(&[point(9.0, 5.0, 3, ts)], ts);
        assert_eq!(first, vec![true]);
        assert_eq!(second, vec![false]);
    }

    #[test]
    fn test_cells_lock_after_enough_observations() {
        let config = BackgroundConfig {
            lock_after_observations: 8,
            ..small_config()
        };
        let mut grid = BackgroundGrid::new(config).unwrap();
        let ts = warm_up(&mut grid, 15.0, 10);
        let cell = grid.cell(2, 3).unwrap();
        assert!(cell.locked);
        assert_eq!(cell.phase(ts, false), CellPhase::Locked);
        assert_eq!(grid.stats().cells_locked, 4 * 36);
    }

    #[test]
    fn test_azimuth_binning_wraps() {
        let grid = BackgroundGrid::new(small_config()).unwrap();
        assert_eq!(grid.azimuth_bin(0.0), 0);
        assert_eq!(grid.azimuth_bin(359.999), 35);
        assert_eq!(grid.azimuth_bin(15.0), 1);
    }
}
