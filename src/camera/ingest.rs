//! Frame ingest: stamping and lossy enqueueing on the camera thread.
//!
//! [`FrameProducer`] is the [`FrameSink`] registered with the camera. It runs
//! on the camera's delivery thread and must never block, so it feeds the
//! processor through a small bounded channel with `try_send`: when the
//! consumer lags, the newest frame is dropped with a diagnostic log and a
//! counter bump. A drop is load shedding, not an error. Frames that survive
//! are delivered strictly in arrival order.
//!
//! The producer owns the [`TimeReference`] for the current camera connection;
//! warm-up frames are consumed for calibration here and never reach the
//! queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::core::{Frame, FrameGuard, FrameRecord, FrameSink};

use super::timebase::{Calibration, TimeReference};

/// Default bounded queue depth between producer and processor.
pub const DEFAULT_QUEUE_DEPTH: usize = 5;

/// Shared frame counters for rate diagnostics.
#[derive(Debug, Default)]
pub struct PipelineStats {
    camera_frames: AtomicU64,
    dropped_frames: AtomicU64,
    processed_frames: AtomicU64,
    recorded_frames: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Frames delivered by the camera (including warm-up and dropped ones).
    pub camera_frames: u64,
    /// Frames dropped at the queue due to backpressure.
    pub dropped_frames: u64,
    /// Frames the processor finished.
    pub processed_frames: u64,
    /// Frames whose statistics were persisted while recording.
    pub recorded_frames: u64,
}

impl PipelineStats {
    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            camera_frames: self.camera_frames.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            processed_frames: self.processed_frames.load(Ordering::Relaxed),
            recorded_frames: self.recorded_frames.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn count_camera_frame(&self) {
        self.camera_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_dropped_frame(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_processed_frame(&self) {
        self.processed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_recorded_frame(&self) {
        self.recorded_frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Stamps frames onto the calibrated timebase and enqueues them for the
/// processor, shedding load when the queue is full.
pub struct FrameProducer {
    tx: mpsc::Sender<FrameRecord>,
    timebase: Mutex<TimeReference>,
    stats: Arc<PipelineStats>,
}

impl FrameProducer {
    /// Builds the producer and the receiving end of its bounded queue.
    pub fn new(
        queue_depth: usize,
        timebase: TimeReference,
        stats: Arc<PipelineStats>,
    ) -> (Self, mpsc::Receiver<FrameRecord>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        (
            Self {
                tx,
                timebase: Mutex::new(timebase),
                stats,
            },
            rx,
        )
    }

    /// Ingests one frame: calibrates or stamps it, then try-sends it to the
    /// processor. Never blocks and never errors; warm-up frames and
    /// backpressure drops simply do not reach the queue.
    pub fn ingest(&self, frame: Frame, host_time: DateTime<Utc>) {
        self.stats.count_camera_frame();

        let timestamp = {
            let Ok(mut timebase) = self.timebase.lock() else {
                tracing::warn!("timebase lock poisoned; discarding frame");
                return;
            };
            match timebase.stamp(host_time, frame.offset_ms) {
                Calibration::WarmingUp => return,
                Calibration::Ready(ts) => ts,
            }
        };

        match self.tx.try_send(FrameRecord { frame, timestamp }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.count_dropped_frame();
                tracing::debug!("Dropping frame due to backpressure");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Frame consumer gone; discarding frame");
            }
        }
    }

    /// Resets the time origin for a fresh camera connection.
    pub fn reset_timebase(&self) {
        if let Ok(mut timebase) = self.timebase.lock() {
            timebase.reset();
        }
    }

    /// Whether warm-up has completed for the current connection.
    pub fn is_calibrated(&self) -> bool {
        self.timebase
            .lock()
            .map(|tb| tb.is_calibrated())
            .unwrap_or(false)
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }
}

impl FrameSink for FrameProducer {
    fn on_frame(&self, frame: FrameGuard, host_time: DateTime<Utc>) {
        self.ingest(frame.into_frame(), host_time);
    }
}
