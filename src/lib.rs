//! Core library for the nullbench application.
//!
//! Control and acquisition core for a nulling-interferometry test bench:
//! command sequencing for PLC-backed actuators plus a camera frame pipeline
//! that reduces regions of interest to brightness telemetry on a calibrated
//! timebase.

pub mod bench;
pub mod camera;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod telemetry;
pub mod transport;
