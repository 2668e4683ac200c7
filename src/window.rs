//! # Latency Windows
//!
//! A window is a [`LatencyHistogram`] scoped to a time interval.
//!
//! - [`LatencyWindow`] is the cumulative flavour: it grows for the whole run
//!   and is reported once at the end.
//! - [`PeriodicWindow`] is reported every reporting interval and reset
//!   afterwards. It also owns the [`IdleController`] that paces clock reads
//!   while no samples arrive.
//!
//! Reporting a window extracts its percentiles, which clears its buckets.

use crate::config::{ResolvedConfig, TimeUnit};
use crate::histogram::LatencyHistogram;
use crate::idle::{Clock, IdleController};
use crate::sink::ReportSink;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Percentile value pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: u64,
}

/// Statistics of one window, as handed to a reporting sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowReport {
    pub bytes: u64,
    pub records: u64,
    pub records_per_sec: f64,
    pub mb_per_sec: f64,
    pub mean_latency: f64,
    pub max_latency: u64,
    pub lower_discards: u64,
    pub higher_discards: u64,
    pub percentiles: Vec<PercentileValue>,
    pub elapsed_sec: f64,
    pub time_unit: TimeUnit,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl WindowReport {
    /// Value reported for `percentile` (in percent), if it was requested
    pub fn percentile(&self, percentile: f64) -> Option<u64> {
        self.percentiles
            .iter()
            .find(|p| (p.percentile - percentile).abs() < 1e-9)
            .map(|p| p.value)
    }
}

/// Percentile set shared by every window of a run
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileSet {
    percents: Arc<[f64]>,
    fractions: Arc<[f64]>,
}

impl PercentileSet {
    /// `percents` must be ascending values in [0, 100)
    pub fn new(percents: &[f64]) -> Self {
        let fractions: Vec<f64> = percents.iter().map(|p| p / 100.0).collect();
        Self {
            percents: percents.into(),
            fractions: fractions.into(),
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            percents: config.percentiles.as_slice().into(),
            fractions: config.fractions.as_slice().into(),
        }
    }

    pub fn fractions(&self) -> &[f64] {
        &self.fractions
    }

    pub fn percents(&self) -> &[f64] {
        &self.percents
    }
}

/// Destination of a run's cumulative statistics
///
/// Implemented by the in-memory [`LatencyWindow`] and by the CSV-backed
/// full-fidelity recorder.
pub trait LatencyRecordWindow: Send {
    fn record(&mut self, start_time: u64, bytes: u64, events: u64, latency: u64);

    /// Produce the final statistics ending at `end_time`
    fn final_report(&mut self, end_time: u64) -> Result<WindowReport>;
}

/// Histogram plus the start of the interval it covers
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    histogram: LatencyHistogram,
    percentiles: PercentileSet,
    start_time: u64,
    time_unit: TimeUnit,
}

impl LatencyWindow {
    pub fn new(
        histogram: LatencyHistogram,
        percentiles: PercentileSet,
        start_time: u64,
        time_unit: TimeUnit,
    ) -> Self {
        Self {
            histogram,
            percentiles,
            start_time,
            time_unit,
        }
    }

    pub fn record(&mut self, bytes: u64, events: u64, latency: u64) {
        self.histogram.record(bytes, events, latency);
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Ticks between the window start and `time`
    pub fn elapsed(&self, time: u64) -> u64 {
        time.saturating_sub(self.start_time)
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }

    /// Start a new interval at `start`
    pub fn reset(&mut self, start: u64) {
        self.histogram.reset();
        self.start_time = start;
    }

    /// Compute the statistics of `[start_time, end_time)`, clearing buckets
    ///
    /// An empty window or a zero-length interval yields zero rates and means
    /// instead of non-finite values.
    pub fn report(&mut self, end_time: u64) -> WindowReport {
        let elapsed_sec =
            self.elapsed(end_time) as f64 / self.time_unit.ticks_per_sec() as f64;
        let records = self.histogram.total_records();
        let values = self.histogram.extract_and_clear(self.percentiles.fractions());
        let (records_per_sec, mb_per_sec) = if elapsed_sec > 0.0 {
            (
                records as f64 / elapsed_sec,
                self.histogram.bytes() as f64 / BYTES_PER_MB / elapsed_sec,
            )
        } else {
            (0.0, 0.0)
        };

        WindowReport {
            bytes: self.histogram.bytes(),
            records,
            records_per_sec,
            mb_per_sec,
            mean_latency: self.histogram.mean_latency(),
            max_latency: self.histogram.max_latency(),
            lower_discards: self.histogram.lower_discards(),
            higher_discards: self.histogram.higher_discards(),
            percentiles: self
                .percentiles
                .percents()
                .iter()
                .zip(values)
                .map(|(&percentile, value)| PercentileValue { percentile, value })
                .collect(),
            elapsed_sec,
            time_unit: self.time_unit,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl LatencyRecordWindow for LatencyWindow {
    fn record(&mut self, _start_time: u64, bytes: u64, events: u64, latency: u64) {
        LatencyWindow::record(self, bytes, events, latency);
    }

    fn final_report(&mut self, end_time: u64) -> Result<WindowReport> {
        Ok(self.report(end_time))
    }
}

/// Window printed and reset once per reporting interval
#[derive(Debug)]
pub struct PeriodicWindow {
    window: LatencyWindow,
    interval_ms: u64,
    interval_ticks: u64,
    idle: IdleController,
    printed: u64,
}

impl PeriodicWindow {
    pub fn new(window: LatencyWindow, interval_ms: u64, idle_ns: u64) -> Self {
        let interval_ticks = interval_ms * window.time_unit.ticks_per_ms();
        Self {
            window,
            interval_ms,
            interval_ticks,
            idle: IdleController::new(interval_ms, idle_ns),
            printed: 0,
        }
    }

    pub fn record(&mut self, bytes: u64, events: u64, latency: u64) {
        self.window.record(bytes, events, latency);
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Number of periodic reports emitted so far
    pub fn printed(&self) -> u64 {
        self.printed
    }

    pub fn idle_controller(&self) -> &IdleController {
        &self.idle
    }

    /// Print and reset if more than one interval passed before `time`
    pub fn print_if_due(&mut self, time: u64, sink: &dyn ReportSink) -> bool {
        if self.window.elapsed(time) > self.interval_ticks {
            self.print_and_reset(time, sink);
            true
        } else {
            false
        }
    }

    /// One idle tick; reads the clock only when the controller asks for it
    ///
    /// Returns the time the caller should use from now on: `time` unchanged
    /// if the clock was not consulted, the fresh clock reading otherwise.
    pub fn idle_wait_print(&mut self, time: u64, clock: &dyn Clock, sink: &dyn ReportSink) -> u64 {
        if !self.idle.wait_check(clock) {
            return time;
        }
        let now = clock.now();
        let elapsed = self.window.elapsed(now);
        let elapsed_ms = elapsed / self.window.time_unit.ticks_per_ms();
        if elapsed > self.interval_ticks {
            self.print_and_reset(now, sink);
            self.idle.set_elastic(elapsed_ms);
        } else {
            self.idle.update_elastic(elapsed_ms);
        }
        now
    }

    fn print_and_reset(&mut self, time: u64, sink: &dyn ReportSink) {
        let report = self.window.report(time);
        if let Err(e) = sink.print(&report) {
            warn!("Failed to emit periodic report: {:#}", e);
        }
        self.printed += 1;
        self.window.reset(time);
        self.idle.reset();
    }
}
