//! The single active-command slot.
//!
//! The bench runs at most one user-triggered command at a time. A submitted
//! command executes immediately; if it needs polling it then occupies the
//! slot until a progress check reports completion, and further submissions
//! are rejected with [`BenchError::CommandActive`] naming what is running.
//! A periodic driver (UI timer or service loop) calls [`CommandSlot::poll`].

use tokio::sync::Mutex;

use crate::error::{AppResult, BenchError};

use super::Command;

/// Holder of the one command allowed in flight.
#[derive(Default)]
pub struct CommandSlot {
    active: Mutex<Option<Command>>,
}

impl CommandSlot {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes `command`. Synchronous commands finish inside this call and
    /// leave the slot free; asynchronous ones occupy it until polled to
    /// completion. Fails with [`BenchError::CommandActive`] when something is
    /// already in flight, and with the command's own error when execution
    /// fails (the slot then stays free).
    pub async fn submit(&self, mut command: Command) -> AppResult<()> {
        let mut slot = self.active.lock().await;
        if let Some(active) = slot.as_ref() {
            return Err(BenchError::CommandActive(active.text()));
        }
        command.execute().await?;
        if !command.is_synchronous() {
            log::info!("Command in flight: {}", command.text());
            *slot = Some(command);
        }
        Ok(())
    }

    /// Drives the occupying command one progress check. Returns `true` when
    /// the slot is free (nothing was running, or the command just finished).
    /// A failing check frees the slot and surfaces the error; the operator
    /// decides whether to resubmit.
    pub async fn poll(&self) -> AppResult<bool> {
        let mut slot = self.active.lock().await;
        let Some(command) = slot.as_mut() else {
            return Ok(true);
        };
        match command.check_progress().await {
            Ok(true) => {
                log::info!("Command complete: {}", command.text());
                *slot = None;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                log::warn!("Command failed: {}: {e}", command.text());
                *slot = None;
                Err(e)
            }
        }
    }

    /// Description of the command in flight, if any.
    pub async fn active_text(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(Command::text)
    }

    /// Whether nothing is in flight.
    pub async fn is_idle(&self) -> bool {
        self.active.lock().await.is_none()
    }
}
