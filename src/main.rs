//! Headless bench runtime.
//!
//! Wires the full acquisition stack against the simulated camera and the
//! in-memory PLC: actuator bring-up, the frame pipeline with CSV telemetry,
//! the position monitor, and an optional fringe scan driven through the
//! command machinery. Everything runs without hardware:
//!
//! ```bash
//! cargo run -- --scan 0.0 5.0 --duration 30
//! RUST_LOG=debug cargo run -- --config config/bench.toml --record
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use nullbench::bench::motor::{STATE_OPERATIONAL, STATUS_STANDING};
use nullbench::bench::{Motor, PositionMonitor, Shutter};
use nullbench::camera::{
    FrameProducer, PipelineControl, PipelineStats, RoiHistory, RoiProcessor, SimFrameSource,
    TimeReference,
};
use nullbench::commands::scan::{scan_fringes, StartRecording};
use nullbench::commands::{Command, CommandSlot, POLL_INTERVAL};
use nullbench::config::{MotorSettings, Settings};
use nullbench::core::{CameraWindow, FrameSink, FrameSource, ProcessorEvent, TelemetrySink};
use nullbench::transport::mock::MockPlc;
use nullbench::transport::PlcTransport;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Wall-clock format of the PLC time node.
const PLC_TIME_FORMAT: &str = "%Y-%m-%d-%H:%M:%S%.f";

/// Update period for the simulated PLC clock and axis settling.
const PLC_SIM_TICK: Duration = Duration::from_millis(100);

/// How long a shutter move may take before bring-up gives up.
const SHUTTER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Simulated camera frame period, seconds.
    #[arg(long, value_parser = parse_duration, default_value = "0.05")]
    frame_interval: Duration,

    /// Run one fringe scan between two delay-line positions (mm) on the
    /// first motor, recording while the line sweeps.
    #[arg(long, num_args = 2, value_names = ["START_MM", "END_MM"])]
    scan: Option<Vec<f64>>,

    /// Start recording immediately instead of waiting for a scan.
    #[arg(long)]
    record: bool,

    /// Exit after this long (seconds) instead of waiting for Ctrl+C.
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,
}

fn parse_duration(arg: &str) -> Result<Duration, std::num::ParseFloatError> {
    let seconds: f64 = arg.parse()?;
    Ok(Duration::from_secs_f64(seconds))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::new(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("nullbench={}", settings.general.log_level).parse()?),
        )
        .init();

    info!("Starting nullbench");

    // ========================================================================
    // PLC and actuators
    // ========================================================================

    // The bench PLC is stood in for by the in-memory mock; the simulation
    // task below keeps its clock ticking and settles commanded moves.
    let mock = MockPlc::new();
    let plc: Arc<dyn PlcTransport> = Arc::new(mock.clone());

    let mut motor_settings = settings.plc.motors.clone();
    if motor_settings.is_empty() {
        info!("No motors configured; using a built-in delay line");
        motor_settings.push(MotorSettings {
            name: "delay_line".to_string(),
            prefix: "ns=4;s=MAIN.DL_Servo_1".to_string(),
            speed: 100.0,
        });
    }

    let motors: Vec<Arc<Motor>> = motor_settings
        .iter()
        .map(|m| Arc::new(Motor::from_settings(plc.clone(), m, &settings.plc.time_node)))
        .collect();
    let shutters: Vec<Shutter> = settings
        .plc
        .shutters
        .iter()
        .map(|s| Shutter::from_settings(plc.clone(), s, &settings.plc.time_node))
        .collect();

    let mut prefixes: Vec<String> = motor_settings.iter().map(|m| m.prefix.clone()).collect();
    prefixes.extend(settings.plc.shutters.iter().map(|s| s.prefix.clone()));
    seed_axes(&mock, &settings.plc.time_node, &prefixes).await;
    let sim = spawn_plc_simulation(mock.clone(), settings.plc.time_node.clone(), prefixes);

    // ========================================================================
    // Telemetry sink
    // ========================================================================

    #[cfg(feature = "storage_csv")]
    let csv = Arc::new(nullbench::telemetry::CsvTelemetrySink::create(
        std::path::Path::new(&settings.telemetry.output_dir),
    )?);
    #[cfg(feature = "storage_csv")]
    let sink: Arc<dyn TelemetrySink> = csv.clone();
    #[cfg(not(feature = "storage_csv"))]
    let sink: Arc<dyn TelemetrySink> = {
        warn!("storage_csv feature disabled; telemetry stays in memory");
        Arc::new(nullbench::telemetry::MemoryTelemetrySink::new())
    };

    // ========================================================================
    // Frame pipeline
    // ========================================================================

    let rois = settings.roi_definitions()?;
    let window = if settings.camera.windowing {
        settings.camera.window
    } else {
        CameraWindow {
            x: 0,
            y: 0,
            width: settings.camera.window.width,
            height: settings.camera.window.height,
        }
    };

    let stats = Arc::new(PipelineStats::default());
    let timebase = TimeReference::new(
        settings.camera.warmup_frames,
        settings.camera.use_camera_time,
    );
    let (producer, frame_rx) =
        FrameProducer::new(settings.camera.queue_depth, timebase, stats.clone());
    let producer = Arc::new(producer);

    let control = Arc::new(PipelineControl::new(
        settings.camera.coadd.enabled,
        settings.camera.coadd.frames,
    ));
    let processor = RoiProcessor::spawn(
        frame_rx,
        rois.clone(),
        window,
        control.clone(),
        settings.camera.ui_refresh,
        sink.clone(),
        stats.clone(),
    )?;
    let display = spawn_display_task(processor.subscribe(), control.clone(), rois.len());

    let mut source = SimFrameSource::new(window.width, window.height, args.frame_interval);
    source.set_spots(rois.iter().map(|r| r.rect).collect());
    if settings.camera.windowing {
        source.apply_window(&window)?;
    }
    source.connect(Arc::clone(&producer) as Arc<dyn FrameSink>)?;

    // ========================================================================
    // Position monitor
    // ========================================================================

    let mut axes = motors.clone();
    axes.extend(shutters.iter().map(|s| Arc::clone(s.motor())));
    let monitor = PositionMonitor::spawn(
        plc.clone(),
        &axes,
        settings.plc.time_node.clone(),
        settings.plc.poll_interval,
        sink.clone(),
    );

    // ========================================================================
    // Bring-up and the optional scan
    // ========================================================================

    for motor in &motors {
        motor.reset().await?;
        motor.initialize().await?;
        motor.enable().await?;
    }
    for shutter in &shutters {
        let mut open = shutter.command_open();
        open.execute_and_wait(SHUTTER_TIMEOUT).await?;
    }

    let slot = CommandSlot::new();
    if let Some(scan) = &args.scan {
        let sequence = scan_fringes(&motors[0], &control, scan[0], scan[1]);
        slot.submit(Command::asynchronous(sequence)).await?;
        while !slot.poll().await? {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    } else if args.record {
        slot.submit(Command::sync(StartRecording::new(control.clone())))
            .await?;
    }

    // ========================================================================
    // Run until shutdown
    // ========================================================================

    match args.duration {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => info!("Run duration elapsed"),
                _ = shutdown_signal() => {}
            }
        }
        None => shutdown_signal().await,
    }

    if control.is_recording() {
        let frames = control.stop_recording();
        info!("Recording stopped after {frames} frames");
    }

    monitor.stop().await;
    source.disconnect()?;
    drop(producer);
    processor.join();
    let _ = display.await;
    sim.abort();

    #[cfg(feature = "storage_csv")]
    if let Err(e) = csv.flush() {
        warn!("Telemetry flush failed: {e}");
    }

    let totals = stats.snapshot();
    info!(
        camera = totals.camera_frames,
        processed = totals.processed_frames,
        dropped = totals.dropped_frames,
        recorded = totals.recorded_frames,
        "Pipeline totals"
    );
    info!("Shutdown complete");
    Ok(())
}

/// Seeds every axis so the first status read finds a standing, operational
/// drive at position zero.
async fn seed_axes(mock: &MockPlc, time_node: &str, prefixes: &[String]) {
    mock.set_value(time_node, Utc::now().format(PLC_TIME_FORMAT).to_string())
        .await;
    for prefix in prefixes {
        mock.set_axis(prefix, STATUS_STANDING, STATE_OPERATIONAL)
            .await;
        mock.set_value(&format!("{prefix}.stat.lrPosActual"), 0.0)
            .await;
        mock.set_value(&format!("{prefix}.stat.lrVelActual"), 0.0)
            .await;
        mock.set_value(&format!("{prefix}.stat.bInitialised"), true)
            .await;
    }
}

/// Keeps the mock PLC alive: advances the wall-clock node and settles any
/// axis a move RPC left in motion, so commands complete as they would on
/// the bench.
fn spawn_plc_simulation(
    mock: MockPlc,
    time_node: String,
    prefixes: Vec<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PLC_SIM_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            mock.set_value(&time_node, Utc::now().format(PLC_TIME_FORMAT).to_string())
                .await;
            for prefix in &prefixes {
                settle_axis(&mock, prefix).await;
            }
        }
    })
}

/// One settling step: a moving axis lands on its commanded target.
async fn settle_axis(mock: &MockPlc, prefix: &str) {
    let status_node = format!("{prefix}.stat.sStatus");
    let moving = matches!(mock.read_string(&status_node).await.as_deref(), Ok("MOVING"));
    if !moving {
        return;
    }
    let target = mock
        .read_f64(&format!("{prefix}.ctrl.lrPosition"))
        .await
        .unwrap_or(0.0);
    mock.set_value(&format!("{prefix}.stat.lrPosActual"), target)
        .await;
    mock.set_value(&status_node, STATUS_STANDING).await;
}

/// Consumes display events the way a UI would: rolling plot history plus a
/// periodic readout of the newest sample. The history restarts with each
/// recording session.
fn spawn_display_task(
    mut events: broadcast::Receiver<ProcessorEvent>,
    control: Arc<PipelineControl>,
    channels: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut history = RoiHistory::new(channels);
        let mut last_report = Instant::now();
        let mut was_recording = false;
        loop {
            match events.recv().await {
                Ok(ProcessorEvent::RoiSample {
                    timestamp,
                    results,
                    coadded,
                }) => {
                    let recording = control.is_recording();
                    if recording && !was_recording {
                        history.clear();
                    }
                    was_recording = recording;
                    history.push(timestamp, &results);
                    if last_report.elapsed() >= Duration::from_secs(2) {
                        if let Some(first) = results.first() {
                            info!(
                                roi1_max = first.max,
                                coadded,
                                samples = history.len(),
                                "live brightness"
                            );
                        }
                        last_report = Instant::now();
                    }
                }
                Ok(ProcessorEvent::Preview { frame, .. }) => {
                    tracing::debug!(width = frame.width, height = frame.height, "preview frame");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "display subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
