//! Threaded ingestion: a bounded packet queue in front of a pipeline.
//!
//! Point packets are handed to a dedicated worker thread over a crossbeam
//! bounded channel. When the queue is full the configured
//! [`BackpressurePolicy`] applies: `Block` waits for room, `DropNewest`
//! discards the incoming packet and counts it. The worker processes frames in
//! arrival order and publishes a [`PipelineSnapshot`] after each one; readers
//! only ever hold clones of the shared handle.
//!
//! Stopping closes the queue. The worker drains what is left, finalizes the
//! partial frame and hands the pipeline back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use thiserror::Error;

use super::pipeline::{FrameResult, PipelineSnapshot, SensorPipeline};
use crate::config::{BackpressurePolicy, IngestConfig};
use crate::core::types::PolarPoint;

/// Errors raised by the ingest handle.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to spawn ingest worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ingest worker has stopped")]
    Disconnected,

    #[error("ingest worker panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Shared, read-only view of the latest pipeline state.
pub type SharedSnapshot = Arc<RwLock<PipelineSnapshot>>;

/// A batch of points delivered by the point source.
pub type PointPacket = Vec<PolarPoint>;

/// Producer side of a running ingest worker.
pub struct IngestHandle {
    sender: Option<Sender<PointPacket>>,
    policy: BackpressurePolicy,
    dropped: Arc<AtomicU64>,
    snapshot: SharedSnapshot,
    worker: Option<JoinHandle<SensorPipeline>>,
}

impl IngestHandle {
    /// Start a worker thread that owns `pipeline`.
    ///
    /// Every frame result is forwarded to `results` when a sender is given.
    pub fn spawn(
        pipeline: SensorPipeline,
        config: &IngestConfig,
        results: Option<Sender<FrameResult>>,
    ) -> Result<Self> {
        let (sender, receiver) = bounded::<PointPacket>(config.queue_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let snapshot: SharedSnapshot = Arc::new(RwLock::new(PipelineSnapshot {
            sensor_id: pipeline.sensor_id(),
            ..PipelineSnapshot::default()
        }));

        let worker = {
            let snapshot = Arc::clone(&snapshot);
            let dropped = Arc::clone(&dropped);
            thread::Builder::new()
                .name(format!("ingest-{}", pipeline.sensor_id()))
                .spawn(move || run_worker(pipeline, receiver, snapshot, dropped, results))?
        };

        log::info!(
            "ingest worker started (capacity {}, policy {:?})",
            config.queue_capacity,
            config.backpressure
        );

        Ok(Self {
            sender: Some(sender),
            policy: config.backpressure,
            dropped,
            snapshot,
            worker: Some(worker),
        })
    }

    /// Enqueue a packet according to the backpressure policy.
    ///
    /// Returns `Ok(false)` when the packet was dropped because the queue was full.
    pub fn send(&self, packet: PointPacket) -> Result<bool> {
        let sender = self.sender.as_ref().ok_or(IngestError::Disconnected)?;
        match self.policy {
            BackpressurePolicy::Block => sender
                .send(packet)
                .map(|_| true)
                .map_err(|_| IngestError::Disconnected),
            BackpressurePolicy::DropNewest => match sender.try_send(packet) {
                Ok(()) => Ok(true),
                Err(TrySendError::Full(_)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if total.is_power_of_two() {
                        log::warn!("ingest queue full, {} packets dropped so far", total);
                    }
                    Ok(false)
                }
                Err(TrySendError::Disconnected(_)) => Err(IngestError::Disconnected),
            },
        }
    }

    /// Packets discarded under `DropNewest`.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Packets waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    /// Clone of the shared snapshot handle.
    pub fn snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }

    /// Close the queue, wait for the worker and return its pipeline.
    pub fn stop(mut self) -> Result<SensorPipeline> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<SensorPipeline> {
        drop(self.sender.take());
        let worker = self.worker.take().ok_or(IngestError::Disconnected)?;
        worker.join().map_err(|_| IngestError::WorkerPanicked)
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.shutdown() {
                log::error!("ingest shutdown failed: {}", e);
            }
        }
    }
}

fn run_worker(
    mut pipeline: SensorPipeline,
    receiver: Receiver<PointPacket>,
    snapshot: SharedSnapshot,
    dropped: Arc<AtomicU64>,
    results: Option<Sender<FrameResult>>,
) -> SensorPipeline {
    let publish = |pipeline: &SensorPipeline, result: FrameResult| {
        let mut next = pipeline.snapshot(&result);
        next.dropped_packets = dropped.load(Ordering::Relaxed);
        *snapshot.write() = next;
        if let Some(tx) = &results {
            // A receiver that went away only loses results, never stalls the pipeline
            tx.send(result).ok();
        }
    };

    for packet in receiver.iter() {
        for result in pipeline.push_points(&packet) {
            publish(&pipeline, result);
        }
    }

    if let Some(result) = pipeline.finish() {
        publish(&pipeline, result);
    }
    log::info!(
        "ingest worker stopped after {} frames",
        pipeline.stats().frames_processed
    );
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::pipeline::tests::{revolution, test_config};
    use crossbeam_channel::unbounded;

    #[test]
    fn test_worker_processes_and_finalizes() {
        let pipeline = SensorPipeline::new(test_config()).unwrap();
        let (tx, rx) = unbounded();
        let handle = IngestHandle::spawn(pipeline, &IngestConfig::default(), Some(tx)).unwrap();

        for k in 0..3 {
            // Split each revolution into several packets
            for chunk in revolution(k, None).chunks(500) {
                assert!(handle.send(chunk.to_vec()).unwrap());
            }
        }
        let snapshot = handle.snapshot();
        let pipeline = handle.stop().unwrap();

        let results: Vec<FrameResult> = rx.try_iter().collect();
        assert_eq!(results.len(), 3);
        let indices: Vec<u64> = results.iter().map(|r| r.frame_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(pipeline.stats().frames_processed, 3);
        assert_eq!(snapshot.read().frame_index, 2);
        assert_eq!(snapshot.read().stats.frames_processed, 3);
    }

    #[test]
    fn test_drop_newest_counts_dropped_packets() {
        let pipeline = SensorPipeline::new(test_config()).unwrap();
        let config = IngestConfig {
            queue_capacity: 1,
            backpressure: BackpressurePolicy::DropNewest,
        };
        let handle = IngestHandle::spawn(pipeline, &config, None).unwrap();

        let packet = revolution(0, None);
        let mut accepted = 0u64;
        let attempts = 200u64;
        for _ in 0..attempts {
            if handle.send(packet.clone()).unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted + handle.dropped_packets(), attempts);
        assert!(handle.stop().is_ok());
    }

    #[test]
    fn test_snapshot_is_readable_while_running() {
        let pipeline = SensorPipeline::new(test_config()).unwrap();
        let handle = IngestHandle::spawn(pipeline, &IngestConfig::default(), None).unwrap();
        let reader = handle.snapshot();
        assert_eq!(reader.read().stats.frames_processed, 0);
        handle.send(revolution(0, None)).unwrap();
        drop(handle);
        assert_eq!(reader.read().stats.frames_processed, 1);
    }
}
