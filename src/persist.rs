//! # Full-Fidelity Latency Store
//!
//! When a CSV path is configured, the cumulative window does not bucket
//! samples while the run is in progress. Every `(start_time, bytes, events,
//! latency)` tuple is appended to the CSV file instead, and at the end of the
//! run the file is re-read and replayed into a fresh histogram before the
//! final report is computed.
//!
//! ## File format
//!
//! ```csv
//! Start Time (ms),data size (bytes),Records,Latency (ms)
//! 1200,1024,1,3
//! ```
//!
//! A write failure is latched: the recorder stops writing and the final
//! report of the run fails with the original error. Periodic reporting is
//! not affected.

use crate::config::TimeUnit;
use crate::error::PersistError;
use crate::window::{LatencyRecordWindow, LatencyWindow, WindowReport};
use anyhow::Result;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Cumulative window backed by a CSV file of raw samples
#[derive(Debug)]
pub struct CsvLatencyWriter {
    path: PathBuf,
    window: LatencyWindow,
    writer: Option<csv::Writer<File>>,
    error: Option<PersistError>,
    written: u64,
    replayed: bool,
}

impl CsvLatencyWriter {
    /// Create or truncate `path` and write the unit-tagged header
    pub fn create<P: AsRef<Path>>(
        path: P,
        window: LatencyWindow,
        unit: TimeUnit,
    ) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let mut writer = csv::Writer::from_path(&path).map_err(|source| PersistError::Open {
            path: path.clone(),
            source,
        })?;

        let start_header = format!("Start Time ({})", unit);
        let latency_header = format!("Latency ({})", unit);
        writer
            .write_record([
                start_header.as_str(),
                "data size (bytes)",
                "Records",
                latency_header.as_str(),
            ])
            .map_err(|source| PersistError::Write {
                path: path.clone(),
                source,
            })?;
        debug!("Recording raw latencies to: {:?}", path);

        Ok(Self {
            path,
            window,
            writer: Some(writer),
            error: None,
            written: 0,
            replayed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far, header excluded
    pub fn written(&self) -> u64 {
        self.written
    }

    fn close(&mut self) -> Result<(), PersistError> {
        if let Some(err) = self.error.take() {
            self.writer = None;
            return Err(err);
        }
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|source| PersistError::Flush {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn replay(&mut self) -> Result<(), PersistError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|source| PersistError::Open {
                path: self.path.clone(),
                source,
            })?;

        let mut rows = 0u64;
        for (line, row) in reader.deserialize::<(u64, u64, u64, u64)>().enumerate() {
            let (_start_time, bytes, events, latency) =
                row.map_err(|source| PersistError::Read {
                    path: self.path.clone(),
                    line: line as u64 + 2,
                    source,
                })?;
            self.window.record(bytes, events, latency);
            rows += 1;
        }
        info!("Replayed {} latency records from {:?}", rows, self.path);
        Ok(())
    }
}

impl LatencyRecordWindow for CsvLatencyWriter {
    fn record(&mut self, start_time: u64, bytes: u64, events: u64, latency: u64) {
        if self.error.is_some() {
            return;
        }
        if let Some(writer) = self.writer.as_mut() {
            match writer.serialize((start_time, bytes, events, latency)) {
                Ok(()) => self.written += 1,
                Err(source) => {
                    self.error = Some(PersistError::Write {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
    }

    fn final_report(&mut self, end_time: u64) -> Result<WindowReport> {
        if !self.replayed {
            self.close()?;
            self.replay()?;
            self.replayed = true;
        }
        Ok(self.window.report(end_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::LatencyHistogram;
    use crate::window::PercentileSet;

    fn window(start: u64) -> LatencyWindow {
        LatencyWindow::new(
            LatencyHistogram::new(0, 200).unwrap(),
            PercentileSet::new(&[50.0, 99.0]),
            start,
            TimeUnit::Milliseconds,
        )
    }

    #[test]
    fn test_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.csv");
        let mut recorder = CsvLatencyWriter::create(&path, window(0), TimeUnit::Milliseconds).unwrap();
        recorder.record(10, 1024, 1, 5);
        recorder.record(12, 2048, 2, 7);
        recorder.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Start Time (ms),data size (bytes),Records,Latency (ms)"
        );
        assert_eq!(lines[1], "10,1024,1,5");
        assert_eq!(lines[2], "12,2048,2,7");
        assert_eq!(recorder.written(), 2);
    }

    #[test]
    fn test_final_report_replays_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.csv");
        let mut recorder = CsvLatencyWriter::create(&path, window(0), TimeUnit::Milliseconds).unwrap();
        for latency in [5, 5, 100, 250] {
            recorder.record(0, 10, 1, latency);
        }

        let report = recorder.final_report(1_000).unwrap();
        assert_eq!(report.records, 4);
        assert_eq!(report.higher_discards, 1);
        assert_eq!(report.bytes, 40);
        assert_eq!(report.max_latency, 250);
        assert_eq!(report.percentile(50.0), Some(5));
        assert_eq!(report.percentile(99.0), Some(100));
    }

    #[test]
    fn test_open_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("latency.csv");
        let err = CsvLatencyWriter::create(&path, window(0), TimeUnit::Milliseconds).unwrap_err();
        assert!(matches!(err, PersistError::Open { .. }));
    }

    #[test]
    fn test_corrupt_file_fails_final_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.csv");
        let mut recorder = CsvLatencyWriter::create(&path, window(0), TimeUnit::Milliseconds).unwrap();
        recorder.record(0, 1, 1, 1);
        recorder.close().unwrap();
        std::fs::write(&path, "Start Time (ms),data size (bytes),Records,Latency (ms)\nx,1,1,1\n")
            .unwrap();

        let err = recorder.final_report(10).unwrap_err();
        let persist = err.downcast_ref::<PersistError>().unwrap();
        assert!(matches!(persist, PersistError::Read { line: 2, .. }));
    }
}
