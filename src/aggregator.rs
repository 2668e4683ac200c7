//! # Aggregator Task
//!
//! The aggregator is the single consumer of every channel. It runs on its own
//! thread for the duration of one run and owns all histogram and window
//! state, so none of it needs locking.
//!
//! ## State machine
//!
//! ```text
//! Running ──(first end marker)──▶ Draining ──(all channels ended)──▶ Stopped
//!    │                                │
//!    └──────(record or time limit)────┴──────────────────────────────▶ Stopped
//! ```
//!
//! Each step sweeps every live channel once. A sample is recorded in both
//! the periodic and the cumulative window, after which the periodic window
//! is printed and reset if its interval has passed. A sweep that finds
//! nothing performs one idle tick. An end marker drains what the ended
//! channel held at that moment, so no sample sent before the marker is lost
//! and a producer that keeps sending cannot hold the run open.
//!
//! On `Stopped` the cumulative window is reported through the sink as the
//! run's final report.

use crate::channel::ChannelReader;
use crate::idle::Clock;
use crate::sample::Sample;
use crate::sink::ReportSink;
use crate::window::{LatencyRecordWindow, PeriodicWindow, WindowReport};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle of one aggregator run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// No channel has ended yet
    Running,
    /// Some, but not all, channels have ended
    Draining,
    /// Terminal; the final report is due
    Stopped,
}

/// Optional bounds on a run; zero disables a bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub start_time: u64,
    /// Run length in ticks of the run's unit
    pub run_ticks: u64,
    /// Records after which the run stops
    pub total_records: u64,
}

impl RunLimits {
    pub fn unbounded(start_time: u64) -> Self {
        Self {
            start_time,
            run_ticks: 0,
            total_records: 0,
        }
    }
}

/// Consumer loop draining all channels into the run's windows
pub struct Aggregator {
    readers: Vec<ChannelReader>,
    ended: Vec<bool>,
    ended_count: usize,
    periodic: PeriodicWindow,
    total: Box<dyn LatencyRecordWindow>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ReportSink>,
    limits: RunLimits,
    state: AggregatorState,
    time: u64,
    records: u64,
}

impl Aggregator {
    pub fn new(
        readers: Vec<ChannelReader>,
        periodic: PeriodicWindow,
        total: Box<dyn LatencyRecordWindow>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ReportSink>,
        limits: RunLimits,
    ) -> Self {
        let ended = vec![false; readers.len()];
        Self {
            readers,
            ended,
            ended_count: 0,
            periodic,
            total,
            clock,
            sink,
            limits,
            state: AggregatorState::Running,
            time: limits.start_time,
            records: 0,
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Records accounted so far, discarded ones included
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Latest time observed, from a sample or from the clock
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn periodic_window(&self) -> &PeriodicWindow {
        &self.periodic
    }

    /// Run to completion and return the final report
    pub fn run(mut self) -> Result<WindowReport> {
        debug!(
            "Aggregator started over {} channel(s)",
            self.readers.len()
        );
        while self.state != AggregatorState::Stopped {
            self.step();
        }
        self.finish()
    }

    /// One sweep, an idle tick if it found nothing, then the time limit check
    pub fn step(&mut self) {
        if self.state == AggregatorState::Stopped {
            return;
        }
        let found = self.sweep();
        if !found && self.state != AggregatorState::Stopped {
            self.time = self
                .periodic
                .idle_wait_print(self.time, self.clock.as_ref(), self.sink.as_ref());
        }
        if self.limits.run_ticks > 0
            && self.time.saturating_sub(self.limits.start_time) >= self.limits.run_ticks
        {
            debug!("Run time limit reached");
            self.state = AggregatorState::Stopped;
        }
    }

    /// Poll every live channel once; true if any yielded a sample
    fn sweep(&mut self) -> bool {
        let mut found = false;
        for index in 0..self.readers.len() {
            if self.ended[index] {
                continue;
            }
            let Some(sample) = self.readers[index].receive() else {
                continue;
            };
            found = true;
            self.time = sample.end_time();

            if sample.is_end() {
                self.end_channel(index, sample.end_time());
            } else {
                self.accept(&sample);
            }
            if self.state == AggregatorState::Stopped {
                break;
            }
            self.periodic.print_if_due(self.time, self.sink.as_ref());
        }
        found
    }

    fn accept(&mut self, sample: &Sample) {
        let latency = sample.latency();
        self.periodic.record(sample.bytes(), sample.events(), latency);
        self.total
            .record(sample.start_time(), sample.bytes(), sample.events(), latency);
        self.records += sample.events();
        if self.limits.total_records > 0 && self.records >= self.limits.total_records {
            debug!("Record limit of {} reached", self.limits.total_records);
            self.state = AggregatorState::Stopped;
        }
    }

    /// Drain what the channel held when its marker was seen, then retire it
    ///
    /// Anything sent before the marker is already queued, so the queue length
    /// at this point bounds the drain. Samples arriving later are left behind.
    fn end_channel(&mut self, index: usize, end_time: u64) {
        let mut budget = self.readers[index].channel().len();
        while budget > 0 && self.state != AggregatorState::Stopped {
            match self.readers[index].receive_any() {
                Some(sample) if !sample.is_end() => self.accept(&sample),
                Some(_) => {}
                None => break,
            }
            budget -= 1;
        }
        self.time = self.time.max(end_time);
        self.ended[index] = true;
        self.ended_count += 1;
        debug!(
            "Channel {} ended ({}/{})",
            index,
            self.ended_count,
            self.readers.len()
        );

        if self.state != AggregatorState::Stopped {
            self.state = if self.ended_count == self.readers.len() {
                AggregatorState::Stopped
            } else {
                AggregatorState::Draining
            };
        }
    }

    fn finish(&mut self) -> Result<WindowReport> {
        let report = self
            .total
            .final_report(self.time)
            .context("Failed to compute the final report")?;
        self.sink
            .print_total(&report)
            .context("Failed to emit the final report")?;
        info!(
            "Aggregator stopped after {} records and {} periodic reports",
            self.records,
            self.periodic.printed()
        );
        Ok(report)
    }
}
