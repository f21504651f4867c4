//! Simulated camera for development without bench hardware.
//!
//! Generates noisy frames with bright fringe spots at configurable positions.
//! Spot intensity breathes sinusoidally over time so live plots and recorded
//! series show motion. Delivery runs on a thread owned by the source, like the
//! vendor SDK callback thread it stands in for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::core::{CameraWindow, Frame, FrameGuard, FrameSink, FrameSource, RoiRect};
use crate::error::{AppResult, BenchError};

/// Spot brightness floor above the noise band, so spots are always visible.
const SPOT_BASE: u16 = 800;
/// Peak-to-peak sinusoidal swing on top of the floor.
const SPOT_SWING: f64 = 1200.0;
/// Background noise band in counts.
const NOISE_RANGE: std::ops::Range<u16> = 900..1100;
/// Phase advance per frame, radians.
const FRINGE_STEP: f64 = 0.05;

/// Frame geometry and spot layout, re-read by the generator every tick so a
/// window change takes effect on the next frame.
#[derive(Debug, Clone)]
struct Geometry {
    window: CameraWindow,
    spots: Vec<RoiRect>,
}

#[derive(Debug)]
struct SharedState {
    running: AtomicBool,
    geometry: Mutex<Geometry>,
    last_frame: Mutex<Option<Frame>>,
}

/// A [`FrameSource`] backed by a generator thread instead of a camera.
pub struct SimFrameSource {
    frame_interval: Duration,
    shared: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
}

impl SimFrameSource {
    /// A simulated `width` x `height` sensor emitting one frame per
    /// `frame_interval`.
    pub fn new(width: u32, height: u32, frame_interval: Duration) -> Self {
        let geometry = Geometry {
            window: CameraWindow {
                x: 0,
                y: 0,
                width,
                height,
            },
            spots: Vec::new(),
        };
        Self {
            frame_interval: frame_interval.max(Duration::from_millis(1)),
            shared: Arc::new(SharedState {
                running: AtomicBool::new(false),
                geometry: Mutex::new(geometry),
                last_frame: Mutex::new(None),
            }),
            worker: None,
        }
    }

    /// Places bright spots at the given absolute sensor rectangles. Usually
    /// fed with the configured ROI rectangles so every channel sees signal.
    pub fn set_spots(&mut self, spots: Vec<RoiRect>) {
        if let Ok(mut geometry) = self.shared.geometry.lock() {
            geometry.spots = spots;
        }
    }

    fn generate(geometry: &Geometry, tick: u64, interval_ms: f64, rng: &mut impl Rng) -> Frame {
        let width = geometry.window.width;
        let height = geometry.window.height;
        let count = (width as usize) * (height as usize);
        let mut pixels: Vec<u16> = (0..count).map(|_| rng.gen_range(NOISE_RANGE)).collect();

        for (i, spot) in geometry.spots.iter().enumerate() {
            // Per-spot phase offset keeps the channels distinguishable.
            let phase = tick as f64 * FRINGE_STEP + i as f64 * 0.7;
            let level =
                SPOT_BASE + (SPOT_SWING * (1.0 + phase.sin()) / 2.0) as u16;
            let rect = spot.project(&geometry.window, width, height);
            for y in rect.y..rect.y + rect.height {
                let row_start = y as usize * width as usize;
                for x in rect.x..rect.x + rect.width {
                    let idx = row_start + x as usize;
                    pixels[idx] = pixels[idx].saturating_add(level);
                }
            }
        }

        Frame {
            width,
            height,
            pixels,
            offset_ms: tick as f64 * interval_ms,
        }
    }
}

impl FrameSource for SimFrameSource {
    fn connect(&mut self, sink: Arc<dyn FrameSink>) -> AppResult<()> {
        if self.worker.is_some() {
            return Err(BenchError::Camera("simulated camera already connected".into()));
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let interval = self.frame_interval;
        let interval_ms = interval.as_secs_f64() * 1000.0;

        let worker = std::thread::Builder::new()
            .name("sim-camera".into())
            .spawn(move || {
                let mut rng = rand::thread_rng();
                let mut tick: u64 = 0;
                tracing::info!("simulated camera delivering frames");
                while shared.running.load(Ordering::SeqCst) {
                    let Ok(geometry) = shared.geometry.lock().map(|g| g.clone()) else {
                        break;
                    };
                    let frame = Self::generate(&geometry, tick, interval_ms, &mut rng);
                    if let Ok(mut last) = shared.last_frame.lock() {
                        *last = Some(frame.clone());
                    }
                    sink.on_frame(FrameGuard::owned(frame), Utc::now());
                    tick += 1;
                    std::thread::sleep(interval);
                }
                tracing::debug!("simulated camera stopped");
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn disconnect(&mut self) -> AppResult<()> {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(BenchError::Camera("simulated camera thread panicked".into()));
            }
        }
        Ok(())
    }

    fn acquire_frame(&self) -> AppResult<FrameGuard> {
        let frame = self
            .shared
            .last_frame
            .lock()
            .map_err(|_| BenchError::Camera("frame cache poisoned".into()))?
            .clone();
        match frame {
            Some(frame) => Ok(FrameGuard::owned(frame)),
            None => Err(BenchError::Camera("no frame delivered yet".into())),
        }
    }

    fn apply_window(&mut self, window: &CameraWindow) -> AppResult<()> {
        if window.width == 0 || window.height == 0 {
            return Err(BenchError::Camera("readout window has zero area".into()));
        }
        let mut geometry = self
            .shared
            .geometry
            .lock()
            .map_err(|_| BenchError::Camera("geometry lock poisoned".into()))?;
        geometry.window = *window;
        tracing::info!(
            x = window.x,
            y = window.y,
            width = window.width,
            height = window.height,
            "readout window applied"
        );
        Ok(())
    }
}

impl Drop for SimFrameSource {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
