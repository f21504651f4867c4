//! Calibration of the camera's relative clock against the host clock.
//!
//! The camera stamps frames with a millisecond offset from its own internal
//! clock; nothing ties that clock to wall time. To place frames on the bench's
//! common timebase, the first `warmup_frames` frames of a connection are
//! sacrificed: for each, the host observation time minus the camera offset is
//! a candidate for the camera clock's origin, and the smallest candidate wins.
//! The minimum is the sample least inflated by delivery latency, since
//! latency only ever pushes the host observation later. After warm-up the
//! origin freezes for the lifetime of the connection and every frame stamps
//! as `origin + offset`.
//!
//! With `use_camera_time` set, frames instead stamp as the raw offset applied
//! to the Unix epoch, which keeps series comparable across hosts at the cost
//! of absolute meaning. Warm-up behaves identically in that mode.

use chrono::{DateTime, Utc};

/// Outcome of stamping one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calibration {
    /// The frame was consumed for origin calibration and must not flow
    /// downstream.
    WarmingUp,
    /// The canonical absolute timestamp for the frame.
    Ready(DateTime<Utc>),
}

/// Per-connection time origin state. Owned by the ingest producer; reset only
/// when the camera connection is (re)established.
#[derive(Debug)]
pub struct TimeReference {
    warmup_frames: u32,
    use_camera_time: bool,
    calibration_count: u32,
    origin: Option<DateTime<Utc>>,
}

impl TimeReference {
    /// New uncalibrated reference. `warmup_frames` must be at least 1
    /// (enforced by configuration validation).
    pub fn new(warmup_frames: u32, use_camera_time: bool) -> Self {
        Self {
            warmup_frames,
            use_camera_time,
            calibration_count: 0,
            origin: None,
        }
    }

    /// Stamps one frame observation. During warm-up this records the origin
    /// candidate and reports [`Calibration::WarmingUp`]; afterwards it yields
    /// the frame's canonical timestamp.
    pub fn stamp(&mut self, host_time: DateTime<Utc>, offset_ms: f64) -> Calibration {
        let offset = offset_duration(offset_ms);
        if self.calibration_count < self.warmup_frames {
            let candidate = host_time - offset;
            self.origin = Some(match self.origin {
                Some(origin) => origin.min(candidate),
                None => candidate,
            });
            self.calibration_count += 1;
            if self.calibration_count == self.warmup_frames {
                tracing::debug!(
                    origin = %self.origin.map(|o| o.to_rfc3339()).unwrap_or_default(),
                    frames = self.warmup_frames,
                    "camera time origin calibrated"
                );
            }
            return Calibration::WarmingUp;
        }

        if self.use_camera_time {
            return Calibration::Ready(DateTime::UNIX_EPOCH + offset);
        }
        match self.origin {
            Some(origin) => Calibration::Ready(origin + offset),
            // Unreachable with warmup_frames >= 1; fall back to the host
            // clock rather than fabricating an origin.
            None => Calibration::Ready(host_time),
        }
    }

    /// Whether warm-up has finished and frames flow downstream.
    pub fn is_calibrated(&self) -> bool {
        self.calibration_count >= self.warmup_frames
    }

    /// The frozen origin, once at least one warm-up frame was seen.
    pub fn origin(&self) -> Option<DateTime<Utc>> {
        self.origin
    }

    /// Frames consumed for calibration so far, capped at the warm-up length.
    pub fn warmup_progress(&self) -> u32 {
        self.calibration_count.min(self.warmup_frames)
    }

    /// Full reset for a new camera connection: origin cleared, warm-up
    /// restarts from zero.
    pub fn reset(&mut self) {
        self.calibration_count = 0;
        self.origin = None;
    }
}

/// Camera offsets are fractional milliseconds; keep microsecond precision.
fn offset_duration(offset_ms: f64) -> chrono::Duration {
    chrono::Duration::microseconds((offset_ms * 1000.0).round() as i64)
}
