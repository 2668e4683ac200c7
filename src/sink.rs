//! Reporting sinks for window statistics.
//!
//! The aggregator hands every periodic report to [`ReportSink::print`] and the
//! final cumulative report to [`ReportSink::print_total`]. Periodic failures
//! are logged by the caller and never stop measurement; a failing final
//! report fails the run.

use crate::utils::{format_bytes, format_latency, format_rate};
use crate::window::WindowReport;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Consumer of rendered window statistics
pub trait ReportSink: Send + Sync {
    /// Periodic window report
    fn print(&self, report: &WindowReport) -> Result<()>;

    /// Final cumulative report of a run
    fn print_total(&self, report: &WindowReport) -> Result<()>;
}

/// Sink writing one log line per report through `tracing`
#[derive(Debug, Clone)]
pub struct LogSink {
    prefix: String,
}

impl LogSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn render(&self, report: &WindowReport) -> String {
        let unit = report.time_unit.as_str();
        let mut line = format!(
            "{} {} records, {:.1} records/sec, {:.2} MB/sec, {:.1} {} avg latency, {} {} max latency",
            self.prefix,
            report.records,
            report.records_per_sec,
            report.mb_per_sec,
            report.mean_latency,
            unit,
            report.max_latency,
            unit,
        );
        if report.lower_discards > 0 || report.higher_discards > 0 {
            line.push_str(&format!(
                "; {} lower / {} higher discarded",
                report.lower_discards, report.higher_discards
            ));
        }
        for p in &report.percentiles {
            line.push_str(&format!("; {}{} {}th", p.value, unit, p.percentile));
        }
        line
    }
}

impl ReportSink for LogSink {
    fn print(&self, report: &WindowReport) -> Result<()> {
        info!("{}", self.render(report));
        Ok(())
    }

    fn print_total(&self, report: &WindowReport) -> Result<()> {
        info!("Total: {}", self.render(report));
        info!(
            "  Data:       {} in {:.2}s ({})",
            format_bytes(report.bytes),
            report.elapsed_sec,
            format_rate(report.mb_per_sec * 1024.0 * 1024.0)
        );
        info!(
            "  Latency:    mean {}, max {}",
            format_latency(report.mean_latency, report.time_unit),
            format_latency(report.max_latency as f64, report.time_unit)
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    kind: &'static str,
    #[serde(flatten)]
    report: &'a WindowReport,
}

/// Sink appending each report as one JSON object per line
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Create or truncate the output file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        debug!("Streaming reports to: {:?}", path);
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, kind: &'static str, report: &WindowReport) -> Result<()> {
        let json = serde_json::to_string(&JsonLine { kind, report })?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}

impl ReportSink for JsonLinesSink {
    fn print(&self, report: &WindowReport) -> Result<()> {
        self.write("periodic", report)
    }

    fn print_total(&self, report: &WindowReport) -> Result<()> {
        self.write("total", report)
    }
}

/// Forwards every report to each inner sink; the first error wins
pub struct TeeSink {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Box<dyn ReportSink>>) -> Self {
        Self { sinks }
    }
}

impl ReportSink for TeeSink {
    fn print(&self, report: &WindowReport) -> Result<()> {
        let mut result = Ok(());
        for sink in &self.sinks {
            if let Err(e) = sink.print(report) {
                result = result.and(Err(e));
            }
        }
        result
    }

    fn print_total(&self, report: &WindowReport) -> Result<()> {
        let mut result = Ok(());
        for sink in &self.sinks {
            if let Err(e) = sink.print_total(report) {
                result = result.and(Err(e));
            }
        }
        result
    }
}

/// Sink keeping reports in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    periodic: Mutex<Vec<WindowReport>>,
    totals: Mutex<Vec<WindowReport>>,
    fail_periodic: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose periodic prints fail after being recorded
    pub fn failing() -> Self {
        Self {
            fail_periodic: true,
            ..Self::default()
        }
    }

    pub fn periodic(&self) -> Vec<WindowReport> {
        self.periodic.lock().clone()
    }

    pub fn totals(&self) -> Vec<WindowReport> {
        self.totals.lock().clone()
    }
}

impl ReportSink for MemorySink {
    fn print(&self, report: &WindowReport) -> Result<()> {
        self.periodic.lock().push(report.clone());
        if self.fail_periodic {
            anyhow::bail!("periodic sink rejected report");
        }
        Ok(())
    }

    fn print_total(&self, report: &WindowReport) -> Result<()> {
        self.totals.lock().push(report.clone());
        Ok(())
    }
}
