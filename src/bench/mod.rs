//! Bench actuators behind the PLC.
//!
//! Delay lines, mask stages and shutters are PLC-controlled axes exposed over
//! OPC-UA. [`motor::Motor`] wraps one axis; [`shutter::Shutter`] layers
//! open/close semantics over a motor; [`monitor::PositionMonitor`] polls all
//! axes into telemetry.
//!
//! ## Units
//!
//! The PLC trades in millimeters: move targets, `lrPosActual` and RPC speed
//! arguments are all mm or mm/s. Operators think in micrometers, so
//! configured speeds are um/s (divided by 1000 at the RPC boundary) and the
//! recorded `*_pos` telemetry series are um (multiplied by 1000 after read).

pub mod monitor;
pub mod motor;
pub mod shutter;

pub use monitor::PositionMonitor;
pub use motor::{AxisStatus, Motor, MoveAbsolute, MoveRelative};
pub use shutter::Shutter;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Wall-clock format of the PLC time node, e.g. `2024-05-01-12:30:00.125`.
pub(crate) const PLC_TIME_FORMAT: &str = "%Y-%m-%d-%H:%M:%S%.f";

/// Parses a PLC wall-clock string. The PLC keeps NTP-disciplined UTC.
pub(crate) fn parse_plc_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, PLC_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_plc_time() {
        let parsed = parse_plc_time("2024-05-01-12:30:00.125").unwrap();
        assert_eq!(parsed.hour(), 12);
        assert_eq!(parsed.minute(), 30);
        assert_eq!(parsed.timestamp_subsec_millis(), 125);

        // Fractional seconds are optional.
        assert!(parse_plc_time("2024-05-01-12:30:00").is_some());
        assert!(parse_plc_time("not a timestamp").is_none());
    }
}
