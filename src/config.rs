//! Strongly-typed configuration loading and validation.
//!
//! Configuration is loaded from a TOML file plus environment variables
//! (prefixed with `NULLBENCH_`, nested keys joined with `__`):
//!
//! ```text
//! NULLBENCH_CAMERA__QUEUE_DEPTH=8
//! NULLBENCH_CAMERA__USE_CAMERA_TIME=true
//! NULLBENCH_TELEMETRY__OUTPUT_DIR=/data/bench
//! ```
//!
//! Every field carries a default so the crate runs with no file at all
//! (simulation mode). After loading, [`Settings::validate`] checks the values
//! that parse but can still be logically wrong (malformed ROI strings, a zero
//! queue depth, and so on).
//!
//! ROI rectangles live in the file as `"x,y,w,h"` strings, one per channel;
//! [`Settings::save_rois`] writes operator edits back to the file in place.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::core::{CameraWindow, RoiDefinition, RoiRect};
use crate::error::{AppResult, BenchError};

/// Top-level application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// General application settings.
    #[serde(default)]
    pub general: GeneralSettings,
    /// PLC transport and actuator definitions.
    #[serde(default)]
    pub plc: PlcSettings,
    /// Camera and frame-pipeline settings.
    #[serde(default)]
    pub camera: CameraSettings,
    /// Telemetry sink settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

/// General application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSettings {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// PLC transport settings and the actuators behind it.
#[derive(Debug, Clone, Deserialize)]
pub struct PlcSettings {
    /// OPC-UA endpoint URL of the PLC.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Node id of the PLC wall-clock time source.
    #[serde(default = "default_time_node")]
    pub time_node: String,
    /// Position/velocity poll period per motor.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Delay-line motors on the bench.
    #[serde(default)]
    pub motors: Vec<MotorSettings>,
    /// Motor-backed shutters on the bench.
    #[serde(default)]
    pub shutters: Vec<ShutterSettings>,
}

/// One delay-line motor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorSettings {
    /// Telemetry/display name, e.g. `"dl_1"`.
    pub name: String,
    /// OPC-UA node prefix, e.g. `"ns=4;s=MAIN.DL_Servo_1"`.
    pub prefix: String,
    /// Default move speed in micrometers per second.
    #[serde(default = "default_motor_speed")]
    pub speed: f64,
}

/// One motor-backed shutter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutterSettings {
    /// Telemetry/display name, e.g. `"shutter_1"`.
    pub name: String,
    /// OPC-UA node prefix of the backing motor.
    pub prefix: String,
    /// Move speed in micrometers per second.
    #[serde(default = "default_motor_speed")]
    pub speed: f64,
    /// Axis position (mm) at which the beam passes.
    pub open_position: f64,
    /// Axis position (mm) at which the beam is blocked.
    pub close_position: f64,
}

/// Camera and frame-pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraSettings {
    /// Frames consumed at connect time to calibrate the time origin.
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    /// Bounded ingest queue depth; the producer drops frames beyond it.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Stamp frames with the raw camera-relative time instead of the
    /// calibrated origin.
    #[serde(default)]
    pub use_camera_time: bool,
    /// Minimum interval between display events.
    #[serde(with = "humantime_serde", default = "default_ui_refresh")]
    pub ui_refresh: Duration,
    /// Frame coadding.
    #[serde(default)]
    pub coadd: CoaddSettings,
    /// Whether to push the readout window to the camera.
    #[serde(default)]
    pub windowing: bool,
    /// Readout window, applied only when `windowing` is set.
    #[serde(default = "default_window")]
    pub window: CameraWindow,
    /// Number of ROI channels.
    #[serde(default = "default_roi_count")]
    pub roi_count: usize,
    /// Per-channel rectangles as `"x,y,w,h"`; channels beyond the list fall
    /// back to the default boxes.
    #[serde(default)]
    pub rois: Vec<String>,
}

/// Frame coadding settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CoaddSettings {
    /// Whether display processing averages frames before slicing.
    #[serde(default)]
    pub enabled: bool,
    /// Frames per coadd cycle.
    #[serde(default = "default_coadd_frames")]
    pub frames: usize,
}

/// Telemetry sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    /// Directory for session files written by the CSV sink.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_endpoint() -> String {
    "opc.tcp://localhost:4840".to_string()
}

fn default_time_node() -> String {
    "ns=4;s=INFRATEC_TRIGERS.sNTPExtTime".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_motor_speed() -> f64 {
    100.0
}

fn default_warmup_frames() -> u32 {
    100
}

fn default_queue_depth() -> usize {
    5
}

fn default_ui_refresh() -> Duration {
    Duration::from_millis(400)
}

fn default_window() -> CameraWindow {
    CameraWindow {
        x: 0,
        y: 0,
        width: 640,
        height: 512,
    }
}

fn default_roi_count() -> usize {
    10
}

fn default_coadd_frames() -> usize {
    10
}

fn default_output_dir() -> String {
    "data".to_string()
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for PlcSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            time_node: default_time_node(),
            poll_interval: default_poll_interval(),
            motors: Vec::new(),
            shutters: Vec::new(),
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            warmup_frames: default_warmup_frames(),
            queue_depth: default_queue_depth(),
            use_camera_time: false,
            ui_refresh: default_ui_refresh(),
            coadd: CoaddSettings::default(),
            windowing: false,
            window: default_window(),
            roi_count: default_roi_count(),
            rois: Vec::new(),
        }
    }
}

impl Default for CoaddSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frames: default_coadd_frames(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            plc: PlcSettings::default(),
            camera: CameraSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Settings {
    /// Loads settings from the given TOML file (or `config/default.toml` when
    /// `None`, which may be absent) plus `NULLBENCH_` environment overrides,
    /// then validates.
    pub fn new(config_path: Option<&str>) -> AppResult<Self> {
        let mut builder = Config::builder();
        builder = match config_path {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config/default").required(false)),
        };
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("NULLBENCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks values that parse but can still be logically wrong.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(BenchError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.camera.warmup_frames == 0 {
            return Err(BenchError::Configuration(
                "camera.warmup_frames must be >= 1 (the origin needs at least one sample)".into(),
            ));
        }
        if self.camera.queue_depth == 0 {
            return Err(BenchError::Configuration(
                "camera.queue_depth must be >= 1".into(),
            ));
        }
        if self.camera.coadd.frames == 0 || self.camera.coadd.frames > 999 {
            return Err(BenchError::Configuration(format!(
                "camera.coadd.frames must be 1-999, got {}",
                self.camera.coadd.frames
            )));
        }
        if self.camera.roi_count == 0 {
            return Err(BenchError::Configuration(
                "camera.roi_count must be >= 1".into(),
            ));
        }
        if self.camera.rois.len() > self.camera.roi_count {
            return Err(BenchError::Configuration(format!(
                "{} ROI entries configured but roi_count is {}",
                self.camera.rois.len(),
                self.camera.roi_count
            )));
        }
        for entry in &self.camera.rois {
            entry.parse::<RoiRect>()?;
        }
        if self.camera.windowing
            && (self.camera.window.width == 0 || self.camera.window.height == 0)
        {
            return Err(BenchError::Configuration(
                "camera.window must have nonzero width and height when windowing is enabled"
                    .into(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for motor in &self.plc.motors {
            if motor.name.is_empty() || motor.prefix.is_empty() {
                return Err(BenchError::Configuration(
                    "every motor needs a name and a node prefix".into(),
                ));
            }
            if !names.insert(&motor.name) {
                return Err(BenchError::Configuration(format!(
                    "Duplicate motor name: '{}'",
                    motor.name
                )));
            }
            if motor.speed <= 0.0 {
                return Err(BenchError::Configuration(format!(
                    "motor '{}': speed must be positive",
                    motor.name
                )));
            }
        }
        for shutter in &self.plc.shutters {
            if shutter.name.is_empty() || shutter.prefix.is_empty() {
                return Err(BenchError::Configuration(
                    "every shutter needs a name and a node prefix".into(),
                ));
            }
            if !names.insert(&shutter.name) {
                return Err(BenchError::Configuration(format!(
                    "Duplicate actuator name: '{}'",
                    shutter.name
                )));
            }
        }

        Ok(())
    }

    /// Materializes the ROI channels: configured entries first, default boxes
    /// for the rest.
    pub fn roi_definitions(&self) -> AppResult<Vec<RoiDefinition>> {
        let mut rois = Vec::with_capacity(self.camera.roi_count);
        for index in 1..=self.camera.roi_count {
            let rect = match self.camera.rois.get(index - 1) {
                Some(entry) => entry.parse::<RoiRect>()?,
                None => RoiDefinition::default_rect(index),
            };
            rois.push(RoiDefinition::new(index, rect));
        }
        Ok(rois)
    }

    /// Writes the current ROI rectangles back into the configuration file,
    /// replacing `camera.rois` and leaving the rest of the file as-is.
    pub fn save_rois(path: &Path, rois: &[RoiDefinition]) -> AppResult<()> {
        let mut table: toml::Table = match std::fs::read_to_string(path) {
            Ok(text) => text.parse().map_err(|e: toml::de::Error| {
                BenchError::Configuration(format!("cannot rewrite {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(e.into()),
        };

        let camera = table
            .entry("camera")
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let camera = camera.as_table_mut().ok_or_else(|| {
            BenchError::Configuration(format!("{}: 'camera' is not a table", path.display()))
        })?;
        camera.insert(
            "rois".to_string(),
            toml::Value::Array(
                rois.iter()
                    .map(|r| toml::Value::String(r.rect.to_string()))
                    .collect(),
            ),
        );
        camera.insert(
            "roi_count".to_string(),
            toml::Value::Integer(rois.len() as i64),
        );

        let rendered = toml::to_string_pretty(&table)
            .map_err(|e| BenchError::Configuration(format!("cannot render config: {e}")))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use serial_test::serial;

    fn from_toml(text: &str) -> AppResult<Settings> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.camera.warmup_frames, 100);
        assert_eq!(settings.camera.queue_depth, 5);
        assert_eq!(settings.camera.ui_refresh, Duration::from_millis(400));
        assert_eq!(settings.camera.roi_count, 10);
    }

    #[test]
    fn test_parse_full_file() {
        let settings = from_toml(
            r#"
            [general]
            log_level = "debug"

            [plc]
            endpoint = "opc.tcp://plc:4840"
            poll_interval = "250ms"

            [[plc.motors]]
            name = "dl_1"
            prefix = "ns=4;s=MAIN.DL_Servo_1"
            speed = 200.0

            [[plc.shutters]]
            name = "shutter_1"
            prefix = "ns=4;s=MAIN.Shutter_1"
            open_position = 2.0
            close_position = 0.0

            [camera]
            use_camera_time = true
            ui_refresh = "1s"
            windowing = true
            window = { x = 100, y = 200, width = 320, height = 256 }
            rois = ["0,600,50,50", "100,600,50,50"]

            [camera.coadd]
            enabled = true
            frames = 4

            [telemetry]
            output_dir = "/tmp/bench"
            "#,
        )
        .unwrap();

        assert_eq!(settings.plc.motors.len(), 1);
        assert_eq!(settings.plc.motors[0].speed, 200.0);
        assert_eq!(settings.plc.shutters[0].open_position, 2.0);
        assert!(settings.camera.use_camera_time);
        assert_eq!(settings.camera.ui_refresh, Duration::from_secs(1));
        assert_eq!(settings.camera.window.x, 100);
        assert!(settings.camera.coadd.enabled);
        assert_eq!(settings.camera.coadd.frames, 4);
        assert_eq!(settings.telemetry.output_dir, "/tmp/bench");
    }

    #[test]
    fn test_invalid_roi_string_rejected() {
        let result = from_toml(
            r#"
            [camera]
            rois = ["0,600,50"]
            "#,
        );
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must have the form"));
    }

    #[test]
    fn test_zero_queue_depth_rejected() {
        let mut settings = Settings::default();
        settings.camera.queue_depth = 0;
        let result = settings.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("queue_depth"));
    }

    #[test]
    fn test_zero_warmup_rejected() {
        let mut settings = Settings::default();
        settings.camera.warmup_frames = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_coadd_frames_range() {
        let mut settings = Settings::default();
        settings.camera.coadd.frames = 1000;
        assert!(settings.validate().is_err());
        settings.camera.coadd.frames = 999;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_duplicate_motor_name_rejected() {
        let mut settings = Settings::default();
        let motor = MotorSettings {
            name: "dl_1".into(),
            prefix: "ns=4;s=MAIN.DL_Servo_1".into(),
            speed: 100.0,
        };
        settings.plc.motors = vec![motor.clone(), motor];
        let result = settings.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate motor name"));
    }

    #[test]
    fn test_roi_definitions_fall_back_to_defaults() {
        let mut settings = Settings::default();
        settings.camera.rois = vec!["10,20,30,40".to_string()];
        let rois = settings.roi_definitions().unwrap();
        assert_eq!(rois.len(), 10);
        assert_eq!(rois[0].rect, RoiRect::new(10, 20, 30, 40));
        assert_eq!(rois[1].rect, RoiDefinition::default_rect(2));
        assert_eq!(rois[9].rect, RoiDefinition::default_rect(10));
    }

    #[test]
    fn test_save_rois_rewrites_only_camera_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(
            &path,
            "[general]\nlog_level = \"debug\"\n\n[camera]\nrois = [\"0,0,1,1\"]\n",
        )
        .unwrap();

        let rois = vec![
            RoiDefinition::new(1, RoiRect::new(5, 6, 7, 8)),
            RoiDefinition::new(2, RoiRect::new(9, 10, 11, 12)),
        ];
        Settings::save_rois(&path, &rois).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("5,6,7,8"));
        assert!(text.contains("9,10,11,12"));
        assert!(text.contains("log_level"));

        let reloaded = Settings::new(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(reloaded.camera.roi_count, 2);
        assert_eq!(
            reloaded.roi_definitions().unwrap()[1].rect,
            RoiRect::new(9, 10, 11, 12)
        );
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        std::env::set_var("NULLBENCH_CAMERA__QUEUE_DEPTH", "8");
        let settings = Settings::new(None).unwrap();
        std::env::remove_var("NULLBENCH_CAMERA__QUEUE_DEPTH");
        assert_eq!(settings.camera.queue_depth, 8);
    }
}
