//! Canned bench operations: recording switches and composite scans.

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::bench::motor::{Motor, MoveAbsolute};
use crate::camera::PipelineControl;
use crate::error::AppResult;

use super::sequence::CommandSequence;
use super::{Command, SyncCommand};

/// Turns frame recording on. Idempotent: starting an already-running
/// recording logs a warning and succeeds.
pub struct StartRecording {
    control: Arc<PipelineControl>,
}

impl StartRecording {
    /// Command over the given pipeline control block.
    pub fn new(control: Arc<PipelineControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl SyncCommand for StartRecording {
    fn text(&self) -> String {
        "Start recording".to_string()
    }

    async fn execute(&mut self) -> AppResult<()> {
        if self.control.start_recording() {
            info!("Recording started");
        } else {
            warn!("Recording already active");
        }
        Ok(())
    }
}

/// Turns frame recording off and reports the session length.
pub struct StopRecording {
    control: Arc<PipelineControl>,
}

impl StopRecording {
    /// Command over the given pipeline control block.
    pub fn new(control: Arc<PipelineControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl SyncCommand for StopRecording {
    fn text(&self) -> String {
        "Stop recording".to_string()
    }

    async fn execute(&mut self) -> AppResult<()> {
        let frames = self.control.stop_recording();
        info!("Recording stopped after {frames} frames");
        Ok(())
    }
}

/// Builds the fringe scan: drive the delay line to `start_mm`, record while
/// it sweeps to `end_mm`, stop recording when it arrives.
pub fn scan_fringes(
    motor: &Arc<Motor>,
    control: &Arc<PipelineControl>,
    start_mm: f64,
    end_mm: f64,
) -> CommandSequence {
    CommandSequence::new(
        "Scan fringes",
        vec![
            MoveAbsolute::new(Arc::clone(motor), start_mm).command(),
            Command::sync(StartRecording::new(Arc::clone(control))),
            MoveAbsolute::new(Arc::clone(motor), end_mm).command(),
            Command::sync(StopRecording::new(Arc::clone(control))),
        ],
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
