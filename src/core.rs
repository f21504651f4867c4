//! Core data types and trait seams shared across the crate.
//!
//! # Architecture Overview
//!
//! The bench splits into two loosely coupled halves:
//!
//! - The **command side** drives PLC-backed actuators (delay lines, shutters)
//!   through the [`crate::transport::PlcTransport`] seam. Operations are
//!   expressed as command objects (see [`crate::commands`]) so multi-step
//!   procedures can be sequenced and polled.
//! - The **frame side** ingests camera frames through the [`FrameSource`]
//!   seam, stamps them onto a calibrated timebase, reduces configured regions
//!   of interest to brightness statistics and persists them through the
//!   [`TelemetrySink`] seam.
//!
//! # Data Flow
//!
//! ```text
//! camera thread -> FrameSink::on_frame -> bounded queue -> processor thread
//!                                                            |-> TelemetrySink
//!                                                            '-> ProcessorEvent fan-out
//! ```
//!
//! # Thread Safety
//!
//! Frames are owned by whichever pipeline stage currently holds them and are
//! moved, never shared, until they reach the event fan-out (where they travel
//! behind an `Arc`). ROI definitions are read on every frame and written
//! rarely, so they live behind a read-mostly lock owned by the processor.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, BenchError};

// =============================================================================
// Frames
// =============================================================================

/// One camera frame: row-major unsigned 16-bit pixels plus the camera-relative
/// capture offset in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row-major pixel data, `width * height` samples.
    pub pixels: Vec<u16>,
    /// Capture time relative to the camera's internal clock, in milliseconds.
    pub offset_ms: f64,
}

impl Frame {
    /// Builds a frame, checking that the payload matches the declared shape.
    pub fn new(width: u32, height: u32, pixels: Vec<u16>, offset_ms: f64) -> AppResult<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(BenchError::Camera(format!(
                "frame payload is {} samples, expected {}x{}={}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
            offset_ms,
        })
    }

    /// Builds a frame with every pixel set to `value`. Handy for tests and
    /// the simulated source.
    pub fn filled(width: u32, height: u32, value: u16, offset_ms: f64) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
            offset_ms,
        }
    }

    /// Number of pixels in the frame.
    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    /// One row of pixels, or `None` past the bottom edge.
    pub fn row(&self, y: u32) -> Option<&[u16]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.width as usize;
        Some(&self.pixels[start..start + self.width as usize])
    }
}

/// A frame annotated with its canonical absolute timestamp, as produced by the
/// ingest stage after time-reference calibration.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// The pixel payload and camera-relative offset.
    pub frame: Frame,
    /// Canonical absolute capture time (origin + offset).
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Regions of interest
// =============================================================================

/// A rectangle in absolute sensor coordinates.
///
/// Parsed from and rendered to the configuration format `"x,y,w,h"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoiRect {
    /// Left edge, absolute sensor x.
    pub x: u32,
    /// Top edge, absolute sensor y.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl RoiRect {
    /// Builds a rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the rectangle encloses no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Projects the absolute-coordinate rectangle into a frame read out
    /// through `window`: subtracts the window offset, then intersects with
    /// the `frame_width` x `frame_height` frame. A rectangle partially
    /// outside shrinks to the overlap; one fully outside collapses to empty.
    pub fn project(&self, window: &CameraWindow, frame_width: u32, frame_height: u32) -> RoiRect {
        let x0 = i64::from(self.x) - i64::from(window.x);
        let y0 = i64::from(self.y) - i64::from(window.y);
        let x1 = (x0 + i64::from(self.width)).clamp(0, i64::from(frame_width));
        let y1 = (y0 + i64::from(self.height)).clamp(0, i64::from(frame_height));
        let x0 = x0.clamp(0, i64::from(frame_width));
        let y0 = y0.clamp(0, i64::from(frame_height));
        RoiRect {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0).max(0) as u32,
            height: (y1 - y0).max(0) as u32,
        }
    }
}

impl FromStr for RoiRect {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BenchError::Configuration(format!(
                "ROI '{s}' must have the form 'x,y,w,h'"
            )));
        }
        let mut values = [0u32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.parse::<u32>().map_err(|e| {
                BenchError::Configuration(format!("ROI '{s}': invalid field '{part}': {e}"))
            })?;
        }
        Ok(RoiRect::new(values[0], values[1], values[2], values[3]))
    }
}

impl fmt::Display for RoiRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

/// Display colors cycled over the ROI channels.
const ROI_COLORS: [&str; 10] = [
    "green", "red", "cyan", "magenta", "yellow", "blue", "white", "orange", "purple", "pink",
];

/// One tracked region of interest: a 1-based channel index, its rectangle and
/// a display color. The index derives the stable telemetry keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiDefinition {
    /// 1-based channel number.
    pub index: usize,
    /// Tracked rectangle in absolute sensor coordinates.
    pub rect: RoiRect,
    /// Display color for plots.
    pub color: String,
}

impl RoiDefinition {
    /// Builds a definition with the default color for the channel.
    pub fn new(index: usize, rect: RoiRect) -> Self {
        let color = ROI_COLORS[(index.saturating_sub(1)) % ROI_COLORS.len()].to_string();
        Self { index, rect, color }
    }

    /// The fallback rectangle for a channel with no configured entry:
    /// a 50x50 box at `((index-1)*100, 600)`.
    pub fn default_rect(index: usize) -> RoiRect {
        RoiRect::new((index.saturating_sub(1) as u32) * 100, 600, 50, 50)
    }

    /// Human-readable channel name, `"ROI {index}"`.
    pub fn name(&self) -> String {
        format!("ROI {}", self.index)
    }

    /// Stable telemetry key prefix, `"roi{index}"`.
    pub fn key(&self) -> String {
        format!("roi{}", self.index)
    }

    /// Telemetry series key for one statistic, e.g. `"roi3_max"`.
    pub fn series_key(&self, stat: &str) -> String {
        format!("roi{}_{}", self.index, stat)
    }
}

// =============================================================================
// Camera window
// =============================================================================

/// The camera readout window. ROI coordinates stay absolute and are translated
/// by this offset before slicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CameraWindow {
    /// Window left edge on the sensor.
    pub x: u32,
    /// Window top edge on the sensor.
    pub y: u32,
    /// Window width.
    pub width: u32,
    /// Window height.
    pub height: u32,
}

// =============================================================================
// Brightness
// =============================================================================

/// Brightness statistics of one region in one frame.
///
/// `sum` is derived as `mean * width * height` rather than accumulated
/// directly; downstream consumers rely on that identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BrightnessResult {
    /// Minimum pixel value in the region.
    pub min: f64,
    /// Maximum pixel value in the region.
    pub max: f64,
    /// Arithmetic mean of the region.
    pub mean: f64,
    /// `mean * width * height` of the (clamped) region.
    pub sum: f64,
}

// =============================================================================
// Processor events
// =============================================================================

/// Events fanned out by the frame processor to UI/plot subscribers.
#[derive(Debug, Clone)]
pub enum ProcessorEvent {
    /// A throttled live image for display. Raw frame when coadding is off,
    /// the coadded average otherwise.
    Preview {
        /// The frame to display.
        frame: Arc<Frame>,
        /// Canonical timestamp of the triggering frame.
        timestamp: DateTime<Utc>,
    },
    /// Brightness statistics for all configured ROIs of one processed frame.
    RoiSample {
        /// Canonical timestamp of the processed frame.
        timestamp: DateTime<Utc>,
        /// One result per configured ROI, in channel order.
        results: Arc<Vec<BrightnessResult>>,
        /// Whether the statistics come from a coadded frame.
        coadded: bool,
    },
}

// =============================================================================
// Frame source seam
// =============================================================================

/// Scoped access to a frame pulled from the camera.
///
/// Vendor SDKs hand out views into a native buffer that must be released
/// after use; the guard runs its release action when dropped, on every exit
/// path. [`FrameGuard::into_frame`] takes ownership of the copied-out pixels
/// while still releasing the native side.
pub struct FrameGuard {
    frame: Option<Frame>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl FrameGuard {
    /// Wraps an already-owned frame that needs no release action.
    pub fn owned(frame: Frame) -> Self {
        Self {
            frame: Some(frame),
            release: None,
        }
    }

    /// Wraps a frame copied out of a native buffer; `release` frees the
    /// buffer and runs exactly once when the guard drops.
    pub fn with_release(frame: Frame, release: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            frame: Some(frame),
            release: Some(release),
        }
    }

    /// The guarded frame.
    pub fn frame(&self) -> &Frame {
        // Vacated only by into_frame, which consumes the guard.
        match &self.frame {
            Some(f) => f,
            None => unreachable!("frame taken while guard alive"),
        }
    }

    /// Takes the frame out; the native buffer is still released.
    pub fn into_frame(mut self) -> Frame {
        match self.frame.take() {
            Some(f) => f,
            None => unreachable!("frame taken while guard alive"),
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for FrameGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameGuard")
            .field("frame", &self.frame)
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

/// Receiver of frames delivered on the camera's own thread.
///
/// Implementations must not block: the camera thread is shared with the
/// vendor driver and a stall there backs up acquisition.
pub trait FrameSink: Send + Sync {
    /// Called once per delivered frame with the host-clock observation time.
    fn on_frame(&self, frame: FrameGuard, host_time: DateTime<Utc>);
}

/// A source of camera frames (vendor SDK binding or simulation).
pub trait FrameSource: Send {
    /// Registers the sink and starts delivery. Frames arrive on a thread
    /// owned by the source.
    fn connect(&mut self, sink: Arc<dyn FrameSink>) -> AppResult<()>;

    /// Stops delivery and releases the sink.
    fn disconnect(&mut self) -> AppResult<()>;

    /// Pulls the most recent frame outside the delivery callback.
    fn acquire_frame(&self) -> AppResult<FrameGuard>;

    /// Pushes the readout window to the device. Only called when windowing is
    /// enabled in the configuration.
    fn apply_window(&mut self, window: &CameraWindow) -> AppResult<()>;
}

// =============================================================================
// Telemetry seam
// =============================================================================

/// Time-series sink for bench telemetry.
///
/// Implementations are called from the processor thread and from async
/// polling tasks, so they must be cheap and internally synchronized.
pub trait TelemetrySink: Send + Sync {
    /// Writes one sample to `series` at `unix_time_ms`.
    fn write(&self, series: &str, unix_time_ms: i64, value: f64) -> AppResult<()>;

    /// Writes several series sharing one timestamp. The default forwards to
    /// [`TelemetrySink::write`] per row; implementations with per-call
    /// overhead override this.
    fn write_batch(&self, unix_time_ms: i64, rows: &[(String, f64)]) -> AppResult<()> {
        for (series, value) in rows {
            self.write(series, unix_time_ms, *value)?;
        }
        Ok(())
    }
}

/// Milliseconds since the Unix epoch for a timestamp, as telemetry keys it.
pub fn unix_time_ms(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_frame_shape_validation() {
        assert!(Frame::new(4, 2, vec![0; 8], 0.0).is_ok());
        assert!(Frame::new(4, 2, vec![0; 7], 0.0).is_err());
    }

    #[test]
    fn test_frame_row_access() {
        let frame = Frame::new(3, 2, vec![1, 2, 3, 4, 5, 6], 0.0).unwrap();
        assert_eq!(frame.row(0).unwrap(), &[1, 2, 3]);
        assert_eq!(frame.row(1).unwrap(), &[4, 5, 6]);
        assert!(frame.row(2).is_none());
    }

    #[test]
    fn test_roi_rect_parse_roundtrip() {
        let rect: RoiRect = "120, 600, 50, 50".parse().unwrap();
        assert_eq!(rect, RoiRect::new(120, 600, 50, 50));
        assert_eq!(rect.to_string(), "120,600,50,50");

        assert!("120,600,50".parse::<RoiRect>().is_err());
        assert!("a,600,50,50".parse::<RoiRect>().is_err());
    }

    #[test]
    fn test_roi_window_projection() {
        let window = CameraWindow {
            x: 200,
            y: 600,
            width: 640,
            height: 512,
        };
        let local = RoiRect::new(300, 620, 50, 50).project(&window, 640, 512);
        assert_eq!(local, RoiRect::new(100, 20, 50, 50));
    }

    #[test]
    fn test_roi_projection_clamps_partial_overlap() {
        let window = CameraWindow::default();

        // Spills over the right edge.
        let rect = RoiRect::new(620, 10, 50, 20).project(&window, 640, 512);
        assert_eq!(rect, RoiRect::new(620, 10, 20, 20));

        // Straddles the window's left edge: only the overlapping strip stays.
        let shifted = CameraWindow {
            x: 100,
            y: 0,
            width: 640,
            height: 512,
        };
        let rect = RoiRect::new(80, 10, 50, 20).project(&shifted, 640, 512);
        assert_eq!(rect, RoiRect::new(0, 10, 30, 20));

        // Fully outside collapses to empty.
        let rect = RoiRect::new(700, 10, 50, 20).project(&window, 640, 512);
        assert!(rect.is_empty());
        let rect = RoiRect::new(10, 10, 50, 20).project(&shifted, 640, 512);
        assert!(rect.is_empty());
    }

    #[test]
    fn test_default_roi_rects() {
        assert_eq!(RoiDefinition::default_rect(1), RoiRect::new(0, 600, 50, 50));
        assert_eq!(
            RoiDefinition::default_rect(4),
            RoiRect::new(300, 600, 50, 50)
        );
    }

    #[test]
    fn test_roi_keys() {
        let roi = RoiDefinition::new(3, RoiRect::new(0, 0, 10, 10));
        assert_eq!(roi.name(), "ROI 3");
        assert_eq!(roi.key(), "roi3");
        assert_eq!(roi.series_key("avg"), "roi3_avg");
    }

    #[test]
    fn test_frame_guard_releases_on_drop() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let guard = FrameGuard::with_release(
            Frame::filled(2, 2, 7, 0.0),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        assert_eq!(guard.frame().pixels[0], 7);
        let frame = guard.into_frame();
        assert_eq!(frame.pixel_count(), 4);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unix_time_ms() {
        let t = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap();
        assert_eq!(unix_time_ms(t), 1000);
    }
}
