//! Custom error types for the application.
//!
//! This module defines the primary error type, `BenchError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and consistent
//! way to handle the different kinds of failures the bench can produce, from
//! configuration issues to PLC transport problems.
//!
//! ## Error Hierarchy
//!
//! `BenchError` is an enum that consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from the `config` crate, typically file parsing
//!   or format issues in the configuration files.
//! - **`Configuration`**: Semantic errors in the configuration, such as values
//!   that parse but are logically invalid (e.g., a malformed ROI string). These
//!   are caught during the validation step.
//! - **`Io`**: Wraps standard `std::io::Error`, covering file I/O issues.
//! - **`Transport`**: Communication failures between this process and the PLC
//!   (connection loss, read/write errors). These are transient: the device is
//!   presumed healthy and the call can be retried.
//! - **`ActuatorFault`**: A fault reported *by* the device itself. Not
//!   retryable; the axis needs an operator reset before it will move again.
//!   Keeping this separate from `Transport` lets the command layer tell a
//!   network hiccup from a tripped drive.
//! - **`Timeout`**: A blocking wait gave up before the hardware reported
//!   completion. Carries the deadline and a description of what was awaited.
//!   Note that a timeout does not imply the motion stopped.
//! - **`CommandActive`**: A new command was submitted while another one is
//!   still executing on the same slot.
//! - **`Camera`** / **`Telemetry`**: Frame-source and telemetry-sink failures.
//! - **`FeatureNotEnabled`**: Functionality (such as the CSV sink) that was not
//!   compiled in via feature flags.
//!
//! By using `#[from]`, `BenchError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the crate with the `?`
//! operator.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Actuator fault on '{node}': {fault}")]
    ActuatorFault { node: String, fault: String },

    #[error("Timed out after {after:?} waiting on: {operation}")]
    Timeout { after: Duration, operation: String },

    #[error("Already an active command: {0}")]
    CommandActive(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl BenchError {
    /// Whether the failure is a communication problem that is safe to retry.
    ///
    /// Device-reported faults and timeouts are deliberately *not* transient:
    /// a faulted axis needs an operator reset, and a timed-out move may still
    /// be in flight.
    pub fn is_transient(&self) -> bool {
        matches!(self, BenchError::Transport(_))
    }
}
