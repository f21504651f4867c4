//! Camera frame pipeline.
//!
//! Frames enter on the camera's delivery thread ([`ingest::FrameProducer`]),
//! get stamped onto a calibrated timebase ([`timebase::TimeReference`]) and
//! queued with lossy backpressure, and are consumed by a dedicated processing
//! thread ([`processor::RoiProcessor`]) that slices regions of interest,
//! reduces them to brightness statistics ([`brightness`]), optionally coadds,
//! persists telemetry while recording, and fans out throttled display events.
//! [`sim::SimFrameSource`] generates synthetic frames so the whole pipeline
//! runs without hardware.

pub mod brightness;
pub mod ingest;
pub mod processor;
pub mod sim;
pub mod timebase;

pub use ingest::{FrameProducer, PipelineStats, StatsSnapshot};
pub use processor::{PipelineControl, RoiHistory, RoiProcessor, RoiProcessorHandle};
pub use sim::SimFrameSource;
pub use timebase::{Calibration, TimeReference};
