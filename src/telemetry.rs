//! Telemetry sinks with clean feature flag handling.
//!
//! The bench records brightness and position series as flat
//! `(series, unix_time_ms, value)` rows. [`CsvTelemetrySink`] persists them to
//! a session-stamped CSV file when the `storage_csv` feature is enabled;
//! [`MemoryTelemetrySink`] buffers them in memory and backs tests and the
//! feature-disabled fallback.

use std::sync::Mutex;

use crate::core::TelemetrySink;
use crate::error::{AppResult, BenchError};

// =============================================================================
// CSV sink
// =============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::File;
    use std::path::{Path, PathBuf};

    /// Appends telemetry rows to one CSV file per session.
    ///
    /// The writer is shared between the processor thread and async polling
    /// tasks; a mutex serializes the underlying `csv::Writer`. Rows are
    /// buffered by the writer and flushed explicitly on shutdown.
    pub struct CsvTelemetrySink {
        path: PathBuf,
        writer: Mutex<csv::Writer<File>>,
    }

    impl CsvTelemetrySink {
        /// Opens `session_<stamp>.csv` under `output_dir`, creating the
        /// directory if needed, and writes the header row.
        pub fn create(output_dir: &Path) -> AppResult<Self> {
            if !output_dir.exists() {
                std::fs::create_dir_all(output_dir)?;
            }
            let file_name = format!(
                "session_{}.csv",
                chrono::Utc::now().format("%Y%m%d_%H%M%S")
            );
            let path = output_dir.join(file_name);
            let file = File::create(&path)?;
            let mut writer = csv::Writer::from_writer(file);
            writer
                .write_record(["series", "unix_time_ms", "value"])
                .map_err(|e| BenchError::Telemetry(format!("writing CSV header: {e}")))?;
            log::info!("Telemetry CSV opened at '{}'", path.display());
            Ok(Self {
                path,
                writer: Mutex::new(writer),
            })
        }

        /// The session file this sink appends to.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Flushes buffered rows to disk.
        pub fn flush(&self) -> AppResult<()> {
            self.writer
                .lock()
                .map_err(|_| BenchError::Telemetry("CSV writer lock poisoned".into()))?
                .flush()?;
            Ok(())
        }
    }

    impl TelemetrySink for CsvTelemetrySink {
        fn write(&self, series: &str, unix_time_ms: i64, value: f64) -> AppResult<()> {
            self.write_batch(unix_time_ms, &[(series.to_string(), value)])
        }

        fn write_batch(&self, unix_time_ms: i64, rows: &[(String, f64)]) -> AppResult<()> {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| BenchError::Telemetry("CSV writer lock poisoned".into()))?;
            for (series, value) in rows {
                writer
                    .write_record([
                        series.as_str(),
                        &unix_time_ms.to_string(),
                        &value.to_string(),
                    ])
                    .map_err(|e| {
                        BenchError::Telemetry(format!("writing row for '{series}': {e}"))
                    })?;
            }
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use std::path::Path;

    /// Placeholder that reports the missing `storage_csv` feature.
    pub struct CsvTelemetrySink;

    impl CsvTelemetrySink {
        /// Always fails: the `storage_csv` feature is not compiled in.
        pub fn create(_output_dir: &Path) -> AppResult<Self> {
            Err(BenchError::FeatureNotEnabled("storage_csv".to_string()))
        }

        /// Always fails: the `storage_csv` feature is not compiled in.
        pub fn flush(&self) -> AppResult<()> {
            Err(BenchError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }

    impl TelemetrySink for CsvTelemetrySink {
        fn write(&self, _series: &str, _unix_time_ms: i64, _value: f64) -> AppResult<()> {
            Err(BenchError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvTelemetrySink;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvTelemetrySink;

// =============================================================================
// Memory sink
// =============================================================================

/// One recorded telemetry row.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRow {
    /// Series key, e.g. `"roi1_max"` or `"delay_line_pos"`.
    pub series: String,
    /// Sample time in milliseconds since the Unix epoch.
    pub unix_time_ms: i64,
    /// Sample value.
    pub value: f64,
}

/// In-memory sink for tests and for running without persistent storage.
#[derive(Debug, Default)]
pub struct MemoryTelemetrySink {
    rows: Mutex<Vec<TelemetryRow>>,
}

impl MemoryTelemetrySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out everything recorded so far, in write order.
    pub fn rows(&self) -> Vec<TelemetryRow> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of rows recorded.
    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values recorded for one series, in write order.
    pub fn values_for(&self, series: &str) -> Vec<f64> {
        self.rows
            .lock()
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.series == series)
                    .map(|r| r.value)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl TelemetrySink for MemoryTelemetrySink {
    fn write(&self, series: &str, unix_time_ms: i64, value: f64) -> AppResult<()> {
        self.rows
            .lock()
            .map_err(|_| BenchError::Telemetry("memory sink lock poisoned".into()))?
            .push(TelemetryRow {
                series: series.to_string(),
                unix_time_ms,
                value,
            });
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
