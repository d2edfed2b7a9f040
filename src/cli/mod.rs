//! Command-line interface for the LIDAR pipeline.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::loaders::{load_polar_csv, load_tracks_json};
use crate::core::stats::speed_percentiles;
use crate::core::types::PolarPoint;
use crate::core::writers::{write_clusters_csv, write_mask_csv, write_tracks_json};
use crate::processors::clustering::Cluster;
use crate::processors::ingest::IngestHandle;
use crate::processors::pipeline::{FrameResult, SensorPipeline};
use crate::processors::tracking::ObjectClass;
use crate::PipelineConfig;

/// Points handed to the pipeline per packet during replay.
const REPLAY_PACKET_POINTS: usize = 4096;

#[derive(Parser)]
#[command(name = "lidar-pipeline")]
#[command(about = "Roadside LIDAR perception pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded polar point CSV through the pipeline
    Replay {
        /// Input CSV with range_m, azimuth_deg, ring_index, timestamp_ns columns
        input: PathBuf,
        /// Output directory for clusters.csv and tracks.json
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// DBSCAN neighborhood radius (meters)
        #[arg(long)]
        epsilon: Option<f32>,
        /// Minimum neighbors for a DBSCAN core point
        #[arg(long)]
        min_points: Option<usize>,
        /// Sensor id to replay; points from other sensors are skipped
        #[arg(long)]
        sensor_id: Option<u32>,
        /// Tracks JSON to resume from
        #[arg(long)]
        restore: Option<PathBuf>,
        /// Feed the pipeline through the threaded ingest queue
        #[arg(long)]
        threaded: bool,
        /// Also write the per-point foreground mask to mask.csv
        #[arg(long)]
        mask: bool,
    },

    /// Write the default configuration as YAML
    DefaultConfig {
        /// Output YAML path
        output: PathBuf,
    },

    /// Print p50/p85/p95 of a list of speeds
    Percentiles {
        /// Speed samples (m/s)
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f32>,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Create a progress bar over `len` points
fn create_progress(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} points ({eta}) {msg}")
    {
        pb.set_style(style);
    }
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // A config that fails to load or validate is fatal
    let config = match &cli.config {
        Some(path) => {
            let cfg = PipelineConfig::from_yaml(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            info!("Loaded config from: {}", path.display());
            cfg
        }
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Replay {
            input,
            output_dir,
            epsilon,
            min_points,
            sensor_id,
            restore,
            threaded,
            mask,
        } => {
            let mut config = config;
            if let Some(eps) = epsilon {
                config.clustering.epsilon = eps;
            }
            if let Some(min) = min_points {
                config.clustering.min_points = min;
            }
            if let Some(id) = sensor_id {
                config.sensor.sensor_id = id;
            }
            cmd_replay(
                &input,
                output_dir,
                ReplayOptions {
                    restore,
                    threaded,
                    mask,
                },
                config,
            )
        }
        Commands::DefaultConfig { output } => cmd_default_config(&output),
        Commands::Percentiles { values } => {
            cmd_percentiles(&values);
            Ok(())
        }
    }
}

/// Switches of the replay command.
struct ReplayOptions {
    restore: Option<PathBuf>,
    threaded: bool,
    mask: bool,
}

/// Frame results plus the pipeline that produced them.
struct ReplayOutcome {
    pipeline: SensorPipeline,
    results: Vec<FrameResult>,
    dropped_packets: u64,
}

fn replay_inline(mut pipeline: SensorPipeline, points: &[PolarPoint]) -> ReplayOutcome {
    let progress = create_progress(points.len() as u64);
    let mut results = Vec::new();
    for packet in points.chunks(REPLAY_PACKET_POINTS) {
        results.extend(pipeline.push_points(packet));
        progress.inc(packet.len() as u64);
    }
    results.extend(pipeline.finish());
    progress.finish_and_clear();

    ReplayOutcome {
        pipeline,
        results,
        dropped_packets: 0,
    }
}

fn replay_threaded(pipeline: SensorPipeline, points: &[PolarPoint]) -> Result<ReplayOutcome> {
    let ingest_config = pipeline.config().ingest.clone();
    let (tx, rx) = unbounded();
    let handle = IngestHandle::spawn(pipeline, &ingest_config, Some(tx))
        .context("failed to start ingest worker")?;

    let progress = create_progress(points.len() as u64);
    for packet in points.chunks(REPLAY_PACKET_POINTS) {
        handle
            .send(packet.to_vec())
            .context("ingest worker stopped during replay")?;
        progress.inc(packet.len() as u64);
        progress.set_message(format!("queued {}", handle.queued()));
    }
    progress.finish_and_clear();

    let dropped_packets = handle.dropped_packets();
    let spinner = create_spinner("Draining ingest queue...");
    let pipeline = handle.stop().context("ingest worker failed")?;
    spinner.finish_and_clear();

    Ok(ReplayOutcome {
        pipeline,
        results: rx.try_iter().collect(),
        dropped_packets,
    })
}

fn cmd_replay(
    input: &Path,
    output_dir: Option<PathBuf>,
    options: ReplayOptions,
    config: PipelineConfig,
) -> Result<()> {
    let ReplayOptions {
        restore,
        threaded,
        mask,
    } = options;
    let start = Instant::now();

    // Default output directory to same as input
    let output_dir = output_dir.unwrap_or_else(|| {
        input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    println!("Replaying point recording...");
    println!("Input: {}", input.display());
    println!("Output directory: {}", output_dir.display());
    println!("Parameters:");
    println!("  epsilon: {}", config.clustering.epsilon);
    println!("  min_points: {}", config.clustering.min_points);
    println!("  sensor_id: {}", config.sensor.sensor_id);
    println!("  threaded: {}", threaded);
    println!("  mask: {}", mask);

    let spinner = create_spinner("Loading points...");
    let points = load_polar_csv(input);
    spinner.finish_and_clear();
    let points = points.with_context(|| format!("failed to load {}", input.display()))?;

    let mut pipeline = SensorPipeline::new(config).context("invalid pipeline configuration")?;
    if let Some(path) = restore.as_deref() {
        let tracks = load_tracks_json(path)
            .with_context(|| format!("failed to load tracks from {}", path.display()))?;
        info!("Restoring {} tracks from {}", tracks.len(), path.display());
        pipeline.tracker_mut().restore(tracks);
    }

    let outcome = if threaded {
        replay_threaded(pipeline, &points)?
    } else {
        replay_inline(pipeline, &points)
    };
    if outcome.results.is_empty() {
        bail!(
            "no frames were produced from {} (sensor id {})",
            input.display(),
            outcome.pipeline.sensor_id()
        );
    }

    let clusters: Vec<Cluster> = outcome
        .results
        .iter()
        .flat_map(|r| r.clusters.iter().cloned())
        .collect();
    let tracker = outcome.pipeline.tracker();
    let tracks: Vec<_> = tracker
        .history()
        .iter()
        .chain(tracker.tracks().iter())
        .cloned()
        .collect();

    let clusters_path = output_dir.join("clusters.csv");
    let tracks_path = output_dir.join("tracks.json");
    write_clusters_csv(&clusters_path, &clusters)?;
    write_tracks_json(&tracks_path, &tracks)?;

    let mask_path = output_dir.join("mask.csv");
    if mask {
        // Frames keep every point of the replayed sensor in input order
        let sensor_id = outcome.pipeline.sensor_id();
        let replayed: Vec<PolarPoint> = points
            .iter()
            .filter(|p| p.sensor_id == sensor_id)
            .copied()
            .collect();
        let flags: Vec<bool> = outcome
            .results
            .iter()
            .flat_map(|r| r.mask.iter().copied())
            .collect();
        if replayed.len() != flags.len() {
            bail!(
                "mask covers {} of {} points ({} packets dropped)",
                flags.len(),
                replayed.len(),
                outcome.dropped_packets
            );
        }
        write_mask_csv(&mask_path, &replayed, &flags)?;
    }

    let stats = outcome.pipeline.stats();
    let labelled = tracks
        .iter()
        .filter(|t| t.object_class != ObjectClass::Other)
        .count();

    print_summary(
        "Replay Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Clusters CSV", clusters_path.display().to_string()),
            ("Tracks JSON", tracks_path.display().to_string()),
            (
                "Mask CSV",
                if mask {
                    mask_path.display().to_string()
                } else {
                    "-".to_string()
                },
            ),
            ("Points", stats.points_processed.to_string()),
            ("Foreign points", stats.foreign_points.to_string()),
            ("Forced frames", stats.forced_frames.to_string()),
            ("Invalid points", stats.grid.invalid_points.to_string()),
            ("Frames", stats.frames_processed.to_string()),
            ("Clusters", clusters.len().to_string()),
            ("Tracks (all)", tracks.len().to_string()),
            ("Tracks (active)", stats.active_tracks.to_string()),
            ("Tracks (labelled)", labelled.to_string()),
            ("Dropped packets", outcome.dropped_packets.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_default_config(output: &Path) -> Result<()> {
    PipelineConfig::default()
        .to_yaml(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Default configuration written to {}", output.display());
    Ok(())
}

fn cmd_percentiles(values: &[f32]) {
    let p = speed_percentiles(values);
    print_summary(
        "Speed Percentiles",
        &[
            ("Samples", values.len().to_string()),
            ("p50", format!("{:.3}", p.p50)),
            ("p85", format!("{:.3}", p.p85)),
            ("p95", format!("{:.3}", p.p95)),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_replay_overrides() {
        let cli = Cli::try_parse_from([
            "lidar-pipeline",
            "-vv",
            "replay",
            "points.csv",
            "--epsilon",
            "0.7",
            "--min-points",
            "5",
            "--threaded",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Replay {
                epsilon,
                min_points,
                threaded,
                ..
            } => {
                assert_eq!(epsilon, Some(0.7));
                assert_eq!(min_points, Some(5));
                assert!(threaded);
            }
            _ => panic!("Expected replay command"),
        }
    }

    #[test]
    fn test_replay_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("points.csv");
        let mut csv = String::from("range_m,azimuth_deg,ring_index,timestamp_ns\n");
        for rev in 0..3i64 {
            for i in 0..36i64 {
                csv.push_str(&format!("20.0,{},0,{}\n", i * 10 + 1, rev * 1000 + i));
            }
        }
        std::fs::write(&input, csv).unwrap();

        let out = dir.path().join("out");
        let options = ReplayOptions {
            restore: None,
            threaded: false,
            mask: true,
        };
        cmd_replay(&input, Some(out.clone()), options, PipelineConfig::default()).unwrap();

        let mask = std::fs::read_to_string(out.join("mask.csv")).unwrap();
        assert_eq!(mask.lines().count(), 1 + 3 * 36);
        assert!(out.join("clusters.csv").exists());
        assert!(out.join("tracks.json").exists());
    }

    #[test]
    fn test_percentiles_requires_values() {
        assert!(Cli::try_parse_from(["lidar-pipeline", "percentiles"]).is_err());
    }
}
