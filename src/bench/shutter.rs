//! Beam shutter driver.
//!
//! A shutter is a motorized flag on a PLC axis: "open" and "closed" are two
//! configured positions on that axis. Open/close are therefore ordinary
//! pollable moves; openness checks compare the live position against the
//! configured targets with a relative tolerance.
//!
//! ## Configuration Example
//!
//! ```toml
//! [[plc.shutters]]
//! name = "beam_a"
//! prefix = "ns=4;s=MAIN.ShutterA"
//! speed = 200.0  # um/s
//! open_position = 12.0   # mm
//! close_position = 0.0   # mm
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::commands::{AsyncCommand, Command};
use crate::config::ShutterSettings;
use crate::error::AppResult;
use crate::transport::PlcTransport;

use super::motor::Motor;

/// Relative tolerance when matching the live position against a target.
pub const POSITION_RTOL: f64 = 0.02;
/// Absolute floor so a 0 mm target is still matchable.
const POSITION_ATOL: f64 = 1e-8;

fn at_target(position: f64, target: f64) -> bool {
    (position - target).abs() <= POSITION_ATOL + POSITION_RTOL * target.abs()
}

/// One beam shutter.
pub struct Shutter {
    motor: Arc<Motor>,
    /// Axis position of the open flag, mm.
    open_position: f64,
    /// Axis position of the closed flag, mm.
    close_position: f64,
}

impl Shutter {
    /// Builds a shutter over an already-constructed axis.
    pub fn new(motor: Arc<Motor>, open_position: f64, close_position: f64) -> Self {
        Self {
            motor,
            open_position,
            close_position,
        }
    }

    /// Builds the shutter and its axis from one configuration entry.
    pub fn from_settings(
        plc: Arc<dyn PlcTransport>,
        settings: &ShutterSettings,
        time_node: &str,
    ) -> Self {
        let motor = Arc::new(Motor::new(
            plc,
            settings.name.clone(),
            settings.prefix.clone(),
            time_node,
            settings.speed,
        ));
        Self::new(motor, settings.open_position, settings.close_position)
    }

    /// Bench-local name.
    pub fn name(&self) -> &str {
        self.motor.name()
    }

    /// The underlying axis, for engineering operations (reset, stop).
    pub fn motor(&self) -> &Arc<Motor> {
        &self.motor
    }

    /// Live axis position in mm.
    pub async fn position(&self) -> AppResult<f64> {
        let (position, _, _) = self.motor.read_position_and_speed().await?;
        Ok(position)
    }

    /// Whether the flag sits at the open position (within tolerance).
    pub async fn is_open(&self) -> AppResult<bool> {
        Ok(at_target(self.position().await?, self.open_position))
    }

    /// Whether the flag sits at the closed position (within tolerance).
    pub async fn is_closed(&self) -> AppResult<bool> {
        Ok(at_target(self.position().await?, self.close_position))
    }

    /// Pollable command driving the flag to the open position.
    pub fn command_open(&self) -> Command {
        Command::asynchronous(ShutterMove {
            motor: Arc::clone(&self.motor),
            target: self.open_position,
            verb: "Open",
        })
    }

    /// Pollable command driving the flag to the closed position.
    pub fn command_close(&self) -> Command {
        Command::asynchronous(ShutterMove {
            motor: Arc::clone(&self.motor),
            target: self.close_position,
            verb: "Close",
        })
    }
}

/// Open or close as a pollable move.
struct ShutterMove {
    motor: Arc<Motor>,
    target: f64,
    verb: &'static str,
}

#[async_trait]
impl AsyncCommand for ShutterMove {
    fn text(&self) -> String {
        format!("{} {}", self.verb, self.motor.name())
    }

    async fn execute(&mut self) -> AppResult<()> {
        self.motor
            .move_absolute(self.target, self.motor.default_speed())
            .await
    }

    async fn poll_complete(&mut self) -> AppResult<bool> {
        self.motor.is_move_complete().await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
