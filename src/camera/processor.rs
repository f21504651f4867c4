//! The ROI processor: the consumer end of the frame pipeline.
//!
//! A dedicated worker thread drains the bounded frame queue with
//! [`tokio::sync::mpsc::Receiver::blocking_recv`], measures the configured
//! regions on every frame and fans the results out three ways:
//!
//! * brightness rows into the [`TelemetrySink`] while recording is active,
//! * [`ProcessorEvent`]s on a broadcast channel for live display,
//! * throughput counters on the shared [`PipelineStats`].
//!
//! The thread owns no async state; it exits when every producer handle has
//! been dropped and the queue drains.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};

use crate::camera::brightness;
use crate::camera::ingest::{PipelineStats, StatsSnapshot};
use crate::core::{
    unix_time_ms, BrightnessResult, CameraWindow, Frame, FrameRecord, ProcessorEvent,
    RoiDefinition, RoiRect, TelemetrySink,
};
use crate::error::AppResult;

/// Broadcast capacity for display events. Slow subscribers lag and drop;
/// they never stall the processor.
const EVENT_CHANNEL_SIZE: usize = 256;

/// How often the processor reports frame rates to the log.
const RATE_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Samples retained per ROI channel in the rolling plot history.
pub const HISTORY_LEN: usize = 6000;

// =============================================================================
// Pipeline control
// =============================================================================

/// Shared switches steering the processor, flipped from the command side and
/// read on the worker thread every frame.
#[derive(Debug)]
pub struct PipelineControl {
    recording: AtomicBool,
    coadd_enabled: AtomicBool,
    coadd_frames: AtomicUsize,
    session_recorded: AtomicU64,
}

impl PipelineControl {
    /// Builds the control block with recording off.
    pub fn new(coadd_enabled: bool, coadd_frames: usize) -> Self {
        Self {
            recording: AtomicBool::new(false),
            coadd_enabled: AtomicBool::new(coadd_enabled),
            coadd_frames: AtomicUsize::new(coadd_frames.max(1)),
            session_recorded: AtomicU64::new(0),
        }
    }

    /// Turns recording on and zeroes the per-session frame counter. Returns
    /// `false` if recording was already active.
    pub fn start_recording(&self) -> bool {
        if self.recording.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.session_recorded.store(0, Ordering::SeqCst);
        true
    }

    /// Turns recording off and returns how many frames the closing session
    /// persisted.
    pub fn stop_recording(&self) -> u64 {
        self.recording.store(false, Ordering::SeqCst);
        self.session_recorded.load(Ordering::SeqCst)
    }

    /// Whether brightness rows are currently persisted.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Reconfigures coadding. `frames` is clamped to at least 1.
    pub fn set_coadd(&self, enabled: bool, frames: usize) {
        self.coadd_frames.store(frames.max(1), Ordering::SeqCst);
        self.coadd_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether frames are averaged before display.
    pub fn coadd_enabled(&self) -> bool {
        self.coadd_enabled.load(Ordering::SeqCst)
    }

    /// Frames per coadd cycle.
    pub fn coadd_frames(&self) -> usize {
        self.coadd_frames.load(Ordering::SeqCst)
    }

    /// Frames persisted since the current recording session started.
    pub fn session_recorded(&self) -> u64 {
        self.session_recorded.load(Ordering::SeqCst)
    }

    pub(crate) fn count_recorded_frame(&self) {
        self.session_recorded.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for PipelineControl {
    fn default() -> Self {
        Self::new(false, 1)
    }
}

// =============================================================================
// Coadd buffer
// =============================================================================

/// Accumulates frames for display averaging.
///
/// The average is the truncated per-pixel arithmetic mean, computed in `u64`
/// so a full cycle of saturated 16-bit frames cannot overflow. A frame whose
/// shape differs from the buffered ones restarts the cycle; the bench only
/// changes shape on a window update, mid-cycle frames from before the change
/// are not worth keeping.
#[derive(Debug, Default)]
pub struct CoaddBuffer {
    frames: Vec<Frame>,
}

impl CoaddBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a frame to the current cycle.
    pub fn push(&mut self, frame: Frame) {
        if let Some(first) = self.frames.first() {
            if first.width != frame.width || first.height != frame.height {
                tracing::warn!(
                    have = %format!("{}x{}", first.width, first.height),
                    got = %format!("{}x{}", frame.width, frame.height),
                    "frame size changed mid-coadd; restarting cycle"
                );
                self.frames.clear();
            }
        }
        self.frames.push(frame);
    }

    /// Frames accumulated so far in this cycle.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the cycle holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drains the cycle into its per-pixel average, or `None` when empty.
    /// The averaged frame carries the camera offset of the newest input.
    pub fn average(&mut self) -> Option<Frame> {
        let last = self.frames.last()?;
        let width = last.width;
        let height = last.height;
        let offset_ms = last.offset_ms;
        let count = self.frames.len() as u64;

        let mut totals = vec![0u64; (width as usize) * (height as usize)];
        for frame in &self.frames {
            for (slot, &px) in totals.iter_mut().zip(&frame.pixels) {
                *slot += u64::from(px);
            }
        }
        self.frames.clear();

        let pixels = totals.into_iter().map(|t| (t / count) as u16).collect();
        // Shape was validated on every input frame.
        Frame::new(width, height, pixels, offset_ms).ok()
    }

    /// Discards the current cycle.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

// =============================================================================
// Rolling ROI history
// =============================================================================

/// Rolling per-channel brightness history for plots, newest sample first.
///
/// Capacity defaults to [`HISTORY_LEN`] samples, roughly half a minute at the
/// bench's usual frame rate.
#[derive(Debug)]
pub struct RoiHistory {
    capacity: usize,
    timestamps: VecDeque<DateTime<Utc>>,
    max_values: Vec<VecDeque<f64>>,
}

impl RoiHistory {
    /// History for `channels` ROI channels with the default capacity.
    pub fn new(channels: usize) -> Self {
        Self::with_capacity(channels, HISTORY_LEN)
    }

    /// History with an explicit per-channel capacity.
    pub fn with_capacity(channels: usize, capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            timestamps: VecDeque::new(),
            max_values: (0..channels).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Prepends one sample per channel, trimming the oldest past capacity.
    /// Extra results beyond the configured channels are ignored.
    pub fn push(&mut self, timestamp: DateTime<Utc>, results: &[BrightnessResult]) {
        self.timestamps.push_front(timestamp);
        self.timestamps.truncate(self.capacity);
        for (series, result) in self.max_values.iter_mut().zip(results) {
            series.push_front(result.max);
            series.truncate(self.capacity);
        }
    }

    /// Samples currently held.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether no samples are held.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Timestamps, newest first.
    pub fn timestamps(&self) -> &VecDeque<DateTime<Utc>> {
        &self.timestamps
    }

    /// Max-brightness series for one zero-based channel, newest first.
    pub fn channel(&self, index: usize) -> Option<&VecDeque<f64>> {
        self.max_values.get(index)
    }

    /// Drops all samples, e.g. when a new recording session starts.
    pub fn clear(&mut self) {
        self.timestamps.clear();
        for series in &mut self.max_values {
            series.clear();
        }
    }
}

// =============================================================================
// Processor
// =============================================================================

/// Handle to a spawned processor thread.
pub struct RoiProcessorHandle {
    thread: Option<std::thread::JoinHandle<()>>,
    events: broadcast::Sender<ProcessorEvent>,
    control: Arc<PipelineControl>,
    rois: Arc<RwLock<Vec<RoiDefinition>>>,
}

impl RoiProcessorHandle {
    /// Subscribes to display events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.events.subscribe()
    }

    /// The control block steering the thread.
    pub fn control(&self) -> Arc<PipelineControl> {
        Arc::clone(&self.control)
    }

    /// The live ROI table. Edits take effect on the next frame.
    pub fn rois(&self) -> Arc<RwLock<Vec<RoiDefinition>>> {
        Arc::clone(&self.rois)
    }

    /// Replaces the ROI table.
    pub fn set_rois(&self, rois: Vec<RoiDefinition>) {
        if let Ok(mut table) = self.rois.write() {
            *table = rois;
        }
    }

    /// A clone of the current ROI table.
    pub fn roi_snapshot(&self) -> Vec<RoiDefinition> {
        self.rois.read().map(|t| t.clone()).unwrap_or_default()
    }

    /// Waits for the thread to exit. It only does once every producer handle
    /// for the frame queue has been dropped.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("ROI processor thread panicked");
            }
        }
    }
}

/// The per-thread processing state. Built once, then moved onto the worker.
pub struct RoiProcessor {
    rois: Arc<RwLock<Vec<RoiDefinition>>>,
    window: CameraWindow,
    control: Arc<PipelineControl>,
    ui_refresh: Duration,
    sink: Arc<dyn TelemetrySink>,
    stats: Arc<PipelineStats>,
    events: broadcast::Sender<ProcessorEvent>,
    coadd: CoaddBuffer,
    last_preview: Option<Instant>,
    clip_warned: HashSet<(usize, RoiRect)>,
}

impl RoiProcessor {
    /// Spawns the worker thread draining `rx`.
    pub fn spawn(
        rx: mpsc::Receiver<FrameRecord>,
        rois: Vec<RoiDefinition>,
        window: CameraWindow,
        control: Arc<PipelineControl>,
        ui_refresh: Duration,
        sink: Arc<dyn TelemetrySink>,
        stats: Arc<PipelineStats>,
    ) -> AppResult<RoiProcessorHandle> {
        let (processor, events, shared_rois) =
            Self::build(rois, window, Arc::clone(&control), ui_refresh, sink, stats);
        let thread = std::thread::Builder::new()
            .name("roi-processor".into())
            .spawn(move || processor.run(rx))?;
        Ok(RoiProcessorHandle {
            thread: Some(thread),
            events,
            control,
            rois: shared_rois,
        })
    }

    fn build(
        rois: Vec<RoiDefinition>,
        window: CameraWindow,
        control: Arc<PipelineControl>,
        ui_refresh: Duration,
        sink: Arc<dyn TelemetrySink>,
        stats: Arc<PipelineStats>,
    ) -> (
        Self,
        broadcast::Sender<ProcessorEvent>,
        Arc<RwLock<Vec<RoiDefinition>>>,
    ) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let rois = Arc::new(RwLock::new(rois));
        let processor = Self {
            rois: Arc::clone(&rois),
            window,
            control,
            ui_refresh,
            sink,
            stats,
            events: events.clone(),
            coadd: CoaddBuffer::new(),
            last_preview: None,
            clip_warned: HashSet::new(),
        };
        (processor, events, rois)
    }

    fn run(mut self, mut rx: mpsc::Receiver<FrameRecord>) {
        tracing::info!("ROI processor started");
        let mut last_report = Instant::now();
        let mut last_snapshot = self.stats.snapshot();
        while let Some(record) = rx.blocking_recv() {
            self.process_record(record);

            if last_report.elapsed() >= RATE_LOG_INTERVAL {
                let snapshot = self.stats.snapshot();
                self.log_rates(&last_snapshot, &snapshot, last_report.elapsed());
                last_snapshot = snapshot;
                last_report = Instant::now();
            }
        }
        tracing::info!("frame queue closed; ROI processor exiting");
    }

    fn log_rates(&self, prev: &StatsSnapshot, now: &StatsSnapshot, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let camera_fps = (now.camera_frames - prev.camera_frames) as f64 / secs;
        let processed_fps = (now.processed_frames - prev.processed_frames) as f64 / secs;
        tracing::info!(
            camera_fps = format_args!("{camera_fps:.1}"),
            processed_fps = format_args!("{processed_fps:.1}"),
            dropped = now.dropped_frames,
            "pipeline frame rates"
        );
    }

    /// Runs one frame through the gate logic:
    ///
    /// * every raw frame is measured while recording, or whenever coadding is
    ///   off (the results then drive the live plots),
    /// * with coadding on, completed cycle averages are measured for display
    ///   but never persisted,
    /// * previews carry the raw frame when coadding is off (rate limited) and
    ///   the cycle average when it is on (one per cycle).
    fn process_record(&mut self, record: FrameRecord) {
        let FrameRecord { frame, timestamp } = record;
        let recording = self.control.is_recording();
        let coadd_on = self.control.coadd_enabled();

        if recording || !coadd_on {
            self.process_rois(&frame, timestamp, false, recording);
        }

        let mut preview = None;
        if coadd_on {
            self.coadd.push(frame);
            if self.coadd.len() >= self.control.coadd_frames() {
                if let Some(average) = self.coadd.average() {
                    self.process_rois(&average, timestamp, true, recording);
                    preview = Some(average);
                }
            }
        } else {
            preview = Some(frame);
        }

        self.stats.count_processed_frame();

        if let Some(frame) = preview {
            // Coadded previews are already paced by the cycle length; raw
            // previews are rate limited.
            let due = coadd_on
                || self
                    .last_preview
                    .map_or(true, |t| t.elapsed() >= self.ui_refresh);
            if due {
                self.last_preview = Some(Instant::now());
                let _ = self.events.send(ProcessorEvent::Preview {
                    frame: Arc::new(frame),
                    timestamp,
                });
            }
        }
    }

    fn process_rois(
        &mut self,
        frame: &Frame,
        timestamp: DateTime<Utc>,
        coadded: bool,
        recording: bool,
    ) {
        let Ok(table) = self.rois.read() else {
            return;
        };

        let mut results = Vec::with_capacity(table.len());
        let mut rows = Vec::new();
        for roi in table.iter() {
            let rect = roi.rect.project(&self.window, frame.width, frame.height);
            if (rect.width, rect.height) != (roi.rect.width, roi.rect.height)
                && self.clip_warned.insert((roi.index, roi.rect))
            {
                tracing::warn!(
                    roi = %roi.name(),
                    configured = %roi.rect,
                    clamped = %rect,
                    "ROI extends outside the frame; measuring the overlap"
                );
            }
            let result = brightness::measure(frame, &rect);
            if !coadded && recording {
                rows.push((roi.series_key("max"), result.max));
                rows.push((roi.series_key("avg"), result.mean));
                rows.push((roi.series_key("sum"), result.sum));
            }
            results.push(result);
        }
        drop(table);

        if !rows.is_empty() {
            match self.sink.write_batch(unix_time_ms(timestamp), &rows) {
                Ok(()) => {
                    self.control.count_recorded_frame();
                    self.stats.count_recorded_frame();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "telemetry write failed; frame not persisted");
                }
            }
        }

        if coadded || !self.control.coadd_enabled() {
            let _ = self.events.send(ProcessorEvent::RoiSample {
                timestamp,
                results: Arc::new(results),
                coadded,
            });
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
