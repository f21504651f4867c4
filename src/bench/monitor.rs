//! Continuous axis position logging.
//!
//! One task polls position and velocity of every configured motor plus the
//! PLC wall clock in a single batched read per cycle. Positions are written
//! as `{motor}_pos` telemetry rows stamped with PLC time; velocities surface
//! in the debug log. The PLC clock updates slower than the poll interval, so
//! a cycle whose clock reading equals the previous one is a stale sample and
//! is skipped instead of producing duplicate rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::core::{unix_time_ms, TelemetrySink};
use crate::transport::{NodeValue, PlcTransport};

use super::motor::Motor;
use super::parse_plc_time;

/// Positions read from the PLC are mm; telemetry series are um.
const MM_TO_UM: f64 = 1000.0;

/// Handle to the spawned polling task.
pub struct PositionMonitor {
    task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl PositionMonitor {
    /// Starts polling `motors` every `interval`, writing into `sink`.
    pub fn spawn(
        plc: Arc<dyn PlcTransport>,
        motors: &[Arc<Motor>],
        time_node: String,
        interval: Duration,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let series: Vec<String> = motors.iter().map(|m| format!("{}_pos", m.name())).collect();
        let mut nodes = Vec::with_capacity(motors.len() * 2 + 1);
        nodes.push(time_node);
        for motor in motors {
            nodes.push(motor.position_node());
            nodes.push(motor.velocity_node());
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task_handle = tokio::spawn(async move {
            info!("Position monitor polling {} axes", series.len());
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_plc_time: Option<DateTime<Utc>> = None;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = tick.tick() => {
                        poll_once(plc.as_ref(), &nodes, &series, &sink, &mut last_plc_time).await;
                    }
                }
            }
            info!("Position monitor stopped");
        });

        Self {
            task_handle: Some(task_handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stops the task and waits for it to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

async fn poll_once(
    plc: &dyn PlcTransport,
    nodes: &[String],
    series: &[String],
    sink: &Arc<dyn TelemetrySink>,
    last_plc_time: &mut Option<DateTime<Utc>>,
) {
    let values = match plc.read_values(nodes).await {
        Ok(values) => values,
        Err(e) => {
            warn!("Position poll failed: {e}");
            return;
        }
    };

    let stamp = match values.first().and_then(|v| v.as_str()) {
        Some(raw) => match parse_plc_time(raw) {
            Some(t) => t,
            None => {
                warn!("Unparseable PLC time '{raw}', stamping with host clock");
                Utc::now()
            }
        },
        None => {
            warn!("PLC time node did not return a string");
            return;
        }
    };

    // The PLC clock ticks slower than we poll; an unchanged reading means
    // the whole sample is stale.
    if *last_plc_time == Some(stamp) {
        return;
    }
    *last_plc_time = Some(stamp);

    let mut rows = Vec::with_capacity(series.len());
    for (name, pair) in series.iter().zip(values[1..].chunks(2)) {
        let position = pair.first().and_then(NodeValue::as_f64);
        let velocity = pair.get(1).and_then(NodeValue::as_f64);
        match position {
            Some(position_mm) => {
                if let Some(velocity_mm_s) = velocity {
                    debug!(
                        "{name}: {:.1} um at {velocity_mm_s:.3} mm/s",
                        position_mm * MM_TO_UM
                    );
                }
                rows.push((name.clone(), position_mm * MM_TO_UM));
            }
            None => warn!("Position node for '{name}' did not return a number"),
        }
    }

    if let Err(e) = sink.write_batch(unix_time_ms(stamp), &rows) {
        warn!("Telemetry write failed for position sample: {e}");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
