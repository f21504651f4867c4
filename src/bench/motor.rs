//! PLC axis driver.
//!
//! One [`Motor`] wraps one PLC axis object. Motion and state transitions go
//! through the axis `RPC_*` methods; live values come from the `stat.*`
//! nodes. Moves are fire-and-forget at this level; the [`MoveAbsolute`] and
//! [`MoveRelative`] command wrappers give them pollable completion for
//! sequences.
//!
//! ## Configuration Example
//!
//! ```toml
//! [[plc.motors]]
//! name = "delay_line"
//! prefix = "ns=4;s=MAIN.DelayLine"
//! speed = 100.0  # um/s
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;

use crate::commands::{AsyncCommand, Command};
use crate::config::MotorSettings;
use crate::error::{AppResult, BenchError};
use crate::transport::{NodeValue, PlcTransport};

/// Status value of an axis that has physically stopped.
pub const STATUS_STANDING: &str = "STANDING";
/// State value of a healthy, ready axis.
pub const STATE_OPERATIONAL: &str = "OPERATIONAL";

const RPC_MOVE_ABS: &str = "4:RPC_MoveAbs";
const RPC_MOVE_REL: &str = "4:RPC_MoveRel";
const RPC_RESET: &str = "4:RPC_Reset";
const RPC_INIT: &str = "4:RPC_Init";
const RPC_ENABLE: &str = "4:RPC_Enable";
const RPC_DISABLE: &str = "4:RPC_Disable";
const RPC_STOP: &str = "4:RPC_Stop";

const NODE_STATUS: &str = "stat.sStatus";
const NODE_STATE: &str = "stat.sState";
const NODE_SUBSTATE: &str = "stat.sSubstate";
const NODE_POS_ACTUAL: &str = "stat.lrPosActual";
const NODE_VEL_ACTUAL: &str = "stat.lrVelActual";
const NODE_INITIALISED: &str = "stat.bInitialised";
const NODE_TARGET: &str = "ctrl.lrPosition";

/// Configured speeds are um/s; the PLC wants mm/s.
const UM_TO_MM: f64 = 1e-3;

/// Snapshot of the axis status triple.
///
/// The strings are opaque enumerations from the PLC; the only values the
/// bench logic interprets are the [`STATUS_STANDING`]/[`STATE_OPERATIONAL`]
/// pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisStatus {
    /// Motion status, e.g. `STANDING` or `MOVING`.
    pub status: String,
    /// Axis state, e.g. `OPERATIONAL` or `FAULT`.
    pub state: String,
    /// State detail, often empty.
    pub substate: String,
}

impl AxisStatus {
    /// Whether a motion command has physically completed with no fault.
    /// Both halves must hold: a faulted axis also reports `STANDING`.
    pub fn is_move_complete(&self) -> bool {
        self.status == STATUS_STANDING && self.state == STATE_OPERATIONAL
    }
}

impl std::fmt::Display for AxisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.substate.is_empty() {
            write!(f, "{}/{}", self.status, self.state)
        } else {
            write!(f, "{}/{} ({})", self.status, self.state, self.substate)
        }
    }
}

/// One PLC-controlled axis.
pub struct Motor {
    /// Bench-local name, e.g. `"delay_line"`.
    name: String,
    /// OPC-UA object node prefix of the axis.
    prefix: String,
    /// Global PLC wall-clock node, read alongside positions.
    time_node: String,
    /// Default move speed in um/s.
    speed_um_s: f64,
    plc: Arc<dyn PlcTransport>,
}

impl Motor {
    /// Builds a motor over `plc`. `speed_um_s` is the default move speed.
    pub fn new(
        plc: Arc<dyn PlcTransport>,
        name: impl Into<String>,
        prefix: impl Into<String>,
        time_node: impl Into<String>,
        speed_um_s: f64,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            time_node: time_node.into(),
            speed_um_s,
            plc,
        }
    }

    /// Builds a motor from one configuration entry.
    pub fn from_settings(
        plc: Arc<dyn PlcTransport>,
        settings: &MotorSettings,
        time_node: &str,
    ) -> Self {
        Self::new(
            plc,
            settings.name.clone(),
            settings.prefix.clone(),
            time_node,
            settings.speed,
        )
    }

    /// Bench-local name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OPC-UA object node prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Configured default speed in um/s.
    pub fn default_speed(&self) -> f64 {
        self.speed_um_s
    }

    fn node(&self, suffix: &str) -> String {
        format!("{}.{}", self.prefix, suffix)
    }

    /// Node id of the live position, for batched monitor reads.
    pub fn position_node(&self) -> String {
        self.node(NODE_POS_ACTUAL)
    }

    /// Node id of the live velocity, for batched monitor reads.
    pub fn velocity_node(&self) -> String {
        self.node(NODE_VEL_ACTUAL)
    }

    async fn call_rpc(&self, method: &str, args: Vec<NodeValue>) -> AppResult<()> {
        self.plc.call_method(&self.prefix, method, args).await?;
        Ok(())
    }

    /// Starts an absolute move to `position` mm at `speed_um_s`. Returns as
    /// soon as the PLC accepts the request; poll [`Motor::status`] for
    /// completion.
    pub async fn move_absolute(&self, position: f64, speed_um_s: f64) -> AppResult<()> {
        let speed_mm_s = speed_um_s * UM_TO_MM;
        self.call_rpc(
            RPC_MOVE_ABS,
            vec![NodeValue::Float(position), NodeValue::Float(speed_mm_s)],
        )
        .await?;
        info!(
            "Motor '{}' moving to {:.4} mm at {:.4} mm/s",
            self.name, position, speed_mm_s
        );
        Ok(())
    }

    /// Starts a relative move by `distance` mm at `speed_um_s`.
    pub async fn move_relative(&self, distance: f64, speed_um_s: f64) -> AppResult<()> {
        let speed_mm_s = speed_um_s * UM_TO_MM;
        self.call_rpc(
            RPC_MOVE_REL,
            vec![NodeValue::Float(distance), NodeValue::Float(speed_mm_s)],
        )
        .await?;
        info!(
            "Motor '{}' moving by {:+.4} mm at {:.4} mm/s",
            self.name, distance, speed_mm_s
        );
        Ok(())
    }

    /// Acknowledges a fault and returns the axis to its resting state.
    pub async fn reset(&self) -> AppResult<()> {
        self.call_rpc(RPC_RESET, vec![]).await?;
        info!("Motor '{}' reset", self.name);
        Ok(())
    }

    /// Runs the axis initialization (homing) routine.
    pub async fn initialize(&self) -> AppResult<()> {
        self.call_rpc(RPC_INIT, vec![]).await?;
        info!("Motor '{}' initializing", self.name);
        Ok(())
    }

    /// Energizes the axis.
    pub async fn enable(&self) -> AppResult<()> {
        self.call_rpc(RPC_ENABLE, vec![]).await?;
        info!("Motor '{}' enabled", self.name);
        Ok(())
    }

    /// De-energizes the axis.
    pub async fn disable(&self) -> AppResult<()> {
        self.call_rpc(RPC_DISABLE, vec![]).await?;
        info!("Motor '{}' disabled", self.name);
        Ok(())
    }

    /// Halts any motion in flight.
    pub async fn stop(&self) -> AppResult<()> {
        self.call_rpc(RPC_STOP, vec![]).await?;
        info!("Motor '{}' stopped", self.name);
        Ok(())
    }

    /// Reads the status triple in one round trip.
    pub async fn status(&self) -> AppResult<AxisStatus> {
        let nodes = [
            self.node(NODE_STATUS),
            self.node(NODE_STATE),
            self.node(NODE_SUBSTATE),
        ];
        let values = self.plc.read_values(&nodes).await?;
        let mut strings = Vec::with_capacity(nodes.len());
        for (node, value) in nodes.iter().zip(&values) {
            let s = value.as_str().ok_or_else(|| {
                BenchError::Transport(format!("node '{node}' returned {value:?}, expected string"))
            })?;
            strings.push(s.to_string());
        }
        let mut strings = strings.into_iter();
        // Length checked above; the iterator yields exactly three items.
        Ok(AxisStatus {
            status: strings.next().unwrap_or_default(),
            state: strings.next().unwrap_or_default(),
            substate: strings.next().unwrap_or_default(),
        })
    }

    /// Whether the last motion has completed: standing AND operational.
    pub async fn is_move_complete(&self) -> AppResult<bool> {
        Ok(self.status().await?.is_move_complete())
    }

    /// Reads position (mm), speed (mm/s) and the PLC wall clock in one round
    /// trip. An unparseable clock string falls back to host time with a
    /// warning; position and speed are still returned.
    pub async fn read_position_and_speed(&self) -> AppResult<(f64, f64, DateTime<Utc>)> {
        let nodes = [
            self.position_node(),
            self.velocity_node(),
            self.time_node.clone(),
        ];
        let values = self.plc.read_values(&nodes).await?;
        let position = values[0].as_f64().ok_or_else(|| {
            BenchError::Transport(format!("node '{}' is not a float", nodes[0]))
        })?;
        let speed = values[1].as_f64().ok_or_else(|| {
            BenchError::Transport(format!("node '{}' is not a float", nodes[1]))
        })?;
        let raw_time = values[2].as_str().ok_or_else(|| {
            BenchError::Transport(format!("node '{}' is not a string", nodes[2]))
        })?;
        let timestamp = match super::parse_plc_time(raw_time) {
            Some(t) => t,
            None => {
                log::warn!(
                    "Motor '{}': unparseable PLC time '{}', using host clock",
                    self.name,
                    raw_time
                );
                Utc::now()
            }
        };
        Ok((position, speed, timestamp))
    }

    /// Reads the target position the PLC currently holds (mm).
    pub async fn target_position(&self) -> AppResult<f64> {
        self.plc.read_f64(&self.node(NODE_TARGET)).await
    }

    /// Whether the axis has run its initialization routine.
    pub async fn is_initialized(&self) -> AppResult<bool> {
        self.plc.read_bool(&self.node(NODE_INITIALISED)).await
    }
}

impl std::fmt::Debug for Motor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Motor")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("speed_um_s", &self.speed_um_s)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Move commands
// =============================================================================

/// Pollable absolute move for use in sequences.
pub struct MoveAbsolute {
    motor: Arc<Motor>,
    /// Target in mm.
    position: f64,
    speed_um_s: f64,
}

impl MoveAbsolute {
    /// Move to `position` mm at the motor's configured speed.
    pub fn new(motor: Arc<Motor>, position: f64) -> Self {
        let speed_um_s = motor.default_speed();
        Self {
            motor,
            position,
            speed_um_s,
        }
    }

    /// Move to `position` mm at an explicit speed in um/s.
    pub fn with_speed(motor: Arc<Motor>, position: f64, speed_um_s: f64) -> Self {
        Self {
            motor,
            position,
            speed_um_s,
        }
    }

    /// Wraps into a [`Command`].
    pub fn command(self) -> Command {
        Command::asynchronous(self)
    }
}

#[async_trait]
impl AsyncCommand for MoveAbsolute {
    fn text(&self) -> String {
        format!("Move {} to {:.4} mm", self.motor.name(), self.position)
    }

    async fn execute(&mut self) -> AppResult<()> {
        self.motor.move_absolute(self.position, self.speed_um_s).await
    }

    async fn poll_complete(&mut self) -> AppResult<bool> {
        self.motor.is_move_complete().await
    }
}

/// Pollable relative move for use in sequences.
pub struct MoveRelative {
    motor: Arc<Motor>,
    /// Distance in mm, signed.
    distance: f64,
    speed_um_s: f64,
}

impl MoveRelative {
    /// Move by `distance` mm at the motor's configured speed.
    pub fn new(motor: Arc<Motor>, distance: f64) -> Self {
        let speed_um_s = motor.default_speed();
        Self {
            motor,
            distance,
            speed_um_s,
        }
    }

    /// Move by `distance` mm at an explicit speed in um/s.
    pub fn with_speed(motor: Arc<Motor>, distance: f64, speed_um_s: f64) -> Self {
        Self {
            motor,
            distance,
            speed_um_s,
        }
    }

    /// Wraps into a [`Command`].
    pub fn command(self) -> Command {
        Command::asynchronous(self)
    }
}

#[async_trait]
impl AsyncCommand for MoveRelative {
    fn text(&self) -> String {
        format!("Move {} by {:+.4} mm", self.motor.name(), self.distance)
    }

    async fn execute(&mut self) -> AppResult<()> {
        self.motor.move_relative(self.distance, self.speed_um_s).await
    }

    async fn poll_complete(&mut self) -> AppResult<bool> {
        self.motor.is_move_complete().await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockPlc;

    const TIME_NODE: &str = "ns=4;s=INFRATEC_TRIGERS.sNTPExtTime";

    fn motor(plc: &MockPlc) -> Motor {
        Motor::new(
            Arc::new(plc.clone()),
            "delay_line",
            "ns=4;s=MAIN.DelayLine",
            TIME_NODE,
            100.0,
        )
    }

    #[tokio::test]
    async fn test_move_absolute_converts_speed() {
        let plc = MockPlc::new();
        let motor = motor(&plc);

        motor.move_absolute(2.5, 100.0).await.unwrap();

        let calls = plc.calls_of("4:RPC_MoveAbs").await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].object_node, "ns=4;s=MAIN.DelayLine");
        assert_eq!(calls[0].args[0], NodeValue::Float(2.5));
        // 100 um/s on the wire is 0.1 mm/s.
        let speed = calls[0].args[1].as_f64().unwrap();
        assert!((speed - 0.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_move_completion_predicate_all_combinations() {
        let plc = MockPlc::new();
        let motor = motor(&plc);
        let cases = [
            ("STANDING", "OPERATIONAL", true),
            ("MOVING", "OPERATIONAL", false),
            // A faulted axis also stands still; that is not completion.
            ("STANDING", "FAULT", false),
            ("MOVING", "INITIALIZING", false),
        ];
        for (status, state, expected) in cases {
            plc.set_axis("ns=4;s=MAIN.DelayLine", status, state).await;
            assert_eq!(
                motor.is_move_complete().await.unwrap(),
                expected,
                "{status}/{state}"
            );
        }
    }

    #[tokio::test]
    async fn test_status_reads_triple() {
        let plc = MockPlc::new();
        plc.set_axis("ns=4;s=MAIN.DelayLine", "MOVING", "OPERATIONAL")
            .await;
        let status = motor(&plc).status().await.unwrap();
        assert_eq!(status.status, "MOVING");
        assert_eq!(status.state, "OPERATIONAL");
        assert_eq!(status.substate, "");
        assert!(!status.is_move_complete());
        assert_eq!(status.to_string(), "MOVING/OPERATIONAL");
    }

    #[tokio::test]
    async fn test_status_on_missing_axis_is_transport_error() {
        let plc = MockPlc::new();
        let err = motor(&plc).status().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_rpc_failure_surfaces_typed_error() {
        let plc = MockPlc::new();
        let motor = motor(&plc);

        plc.fail_next_call(BenchError::ActuatorFault {
            node: "ns=4;s=MAIN.DelayLine".into(),
            fault: "drive overtemperature".into(),
        })
        .await;
        let err = motor.move_absolute(1.0, 100.0).await.unwrap_err();
        assert!(matches!(err, BenchError::ActuatorFault { .. }));
        assert!(!err.is_transient());

        plc.fail_next_call(BenchError::Transport("link down".into()))
            .await;
        let err = motor.move_relative(0.5, 100.0).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_engineering_rpcs() {
        let plc = MockPlc::new();
        let motor = motor(&plc);

        motor.reset().await.unwrap();
        motor.initialize().await.unwrap();
        motor.enable().await.unwrap();
        motor.disable().await.unwrap();
        motor.stop().await.unwrap();

        let methods: Vec<String> = plc.calls().await.into_iter().map(|c| c.method).collect();
        assert_eq!(
            methods,
            vec![
                "4:RPC_Reset",
                "4:RPC_Init",
                "4:RPC_Enable",
                "4:RPC_Disable",
                "4:RPC_Stop"
            ]
        );
    }

    #[tokio::test]
    async fn test_read_position_and_speed_with_plc_clock() {
        let plc = MockPlc::new();
        plc.set_value("ns=4;s=MAIN.DelayLine.stat.lrPosActual", 1.234)
            .await;
        plc.set_value("ns=4;s=MAIN.DelayLine.stat.lrVelActual", 0.05)
            .await;
        plc.set_value(TIME_NODE, "2024-05-01-12:30:00.125").await;

        let (position, speed, timestamp) = motor(&plc).read_position_and_speed().await.unwrap();
        assert_eq!(position, 1.234);
        assert_eq!(speed, 0.05);
        assert_eq!(timestamp, super::super::parse_plc_time("2024-05-01-12:30:00.125").unwrap());
    }

    #[tokio::test]
    async fn test_unparseable_plc_clock_falls_back_to_host() {
        let plc = MockPlc::new();
        plc.set_value("ns=4;s=MAIN.DelayLine.stat.lrPosActual", 2.0)
            .await;
        plc.set_value("ns=4;s=MAIN.DelayLine.stat.lrVelActual", 0.0)
            .await;
        plc.set_value(TIME_NODE, "garbage").await;

        let before = Utc::now();
        let (position, _, timestamp) = motor(&plc).read_position_and_speed().await.unwrap();
        assert_eq!(position, 2.0);
        assert!(timestamp >= before);
    }

    #[tokio::test]
    async fn test_target_and_initialized_reads() {
        let plc = MockPlc::new();
        let motor = motor(&plc);
        plc.set_value("ns=4;s=MAIN.DelayLine.stat.bInitialised", true)
            .await;
        motor.move_absolute(3.5, 50.0).await.unwrap();

        assert!(motor.is_initialized().await.unwrap());
        // The mock stores the MoveAbs target under ctrl.lrPosition.
        assert_eq!(motor.target_position().await.unwrap(), 3.5);
    }

    #[tokio::test]
    async fn test_move_command_lifecycle() {
        let plc = MockPlc::new();
        let motor = Arc::new(motor(&plc));
        plc.set_axis("ns=4;s=MAIN.DelayLine", "STANDING", "OPERATIONAL")
            .await;

        let mut command = MoveAbsolute::new(Arc::clone(&motor), 2.0).command();
        assert_eq!(command.text(), "Move delay_line to 2.0000 mm");
        assert!(!command.is_synchronous());

        command.execute().await.unwrap();
        // The mock flips the axis to MOVING on the RPC.
        assert!(!command.check_progress().await.unwrap());

        plc.set_axis("ns=4;s=MAIN.DelayLine", "STANDING", "OPERATIONAL")
            .await;
        assert!(command.check_progress().await.unwrap());
    }

    #[tokio::test]
    async fn test_relative_command_uses_explicit_speed() {
        let plc = MockPlc::new();
        let motor = Arc::new(motor(&plc));
        plc.set_axis("ns=4;s=MAIN.DelayLine", "STANDING", "OPERATIONAL")
            .await;

        let mut command = MoveRelative::with_speed(motor, -0.25, 40.0).command();
        assert_eq!(command.text(), "Move delay_line by -0.2500 mm");
        command.execute().await.unwrap();

        let calls = plc.calls_of("4:RPC_MoveRel").await;
        assert_eq!(calls[0].args[0], NodeValue::Float(-0.25));
        let speed = calls[0].args[1].as_f64().unwrap();
        assert!((speed - 0.04).abs() < 1e-12);
    }
}
