//! # Measurement Engine
//!
//! `PerfEngine` is the lifecycle façade of the measurement pipeline. It owns
//! the channels, hands a [`ChannelSender`] to each worker, and starts and
//! stops the aggregator thread exactly once per run.
//!
//! ## Run state
//!
//! The engine is either `Idle` or `Running`. Both transitions go through one
//! mutex:
//!
//! - `start` on an idle engine builds the windows, spawns the aggregator and
//!   returns a [`RunHandle`]; on a running engine it returns the handle of
//!   the run in flight.
//! - `stop` on a running engine sends an end marker to every channel, waits
//!   for the final report, clears the channels and goes back to `Idle`. On an
//!   idle engine it does nothing.
//!
//! Opening the optional full-fidelity CSV store happens inside `start`, so
//! a persistence failure is returned before any worker is released.

use crate::aggregator::{Aggregator, RunLimits};
use crate::channel::{Channel, ChannelReader, ChannelSender};
use crate::config::{ChannelLayout, PerfConfig, ResolvedConfig};
use crate::error::ConfigError;
use crate::histogram::LatencyHistogram;
use crate::idle::{Clock, SystemClock};
use crate::persist::CsvLatencyWriter;
use crate::sink::ReportSink;
use crate::utils::validate_workers;
use crate::window::{LatencyRecordWindow, LatencyWindow, PercentileSet, PeriodicWindow, WindowReport};
use anyhow::{anyhow, Context, Result};
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

/// Signals completion even if the aggregator panics
struct CompletionGuard(Arc<Completion>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        *self.0.done.lock() = true;
        self.0.cond.notify_all();
    }
}

/// Completion signal of one aggregator run
#[derive(Debug, Clone)]
pub struct RunHandle {
    completion: Arc<Completion>,
}

impl RunHandle {
    fn new() -> Self {
        Self {
            completion: Arc::new(Completion::default()),
        }
    }

    /// True once the aggregator has produced its final report
    pub fn is_finished(&self) -> bool {
        *self.completion.done.lock()
    }

    /// Block until the aggregator finishes
    pub fn wait(&self) {
        let mut done = self.completion.done.lock();
        while !*done {
            self.completion.cond.wait(&mut done);
        }
    }

    /// Block for at most `timeout`; returns whether the run finished
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.completion.done.lock();
        while !*done {
            if self.completion.cond.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }

    /// Whether two handles observe the same run
    pub fn same_run(&self, other: &RunHandle) -> bool {
        Arc::ptr_eq(&self.completion, &other.completion)
    }
}

enum RunState {
    Idle,
    Running {
        handle: RunHandle,
        thread: JoinHandle<Result<WindowReport>>,
    },
}

/// Lifecycle façade of the measurement pipeline
pub struct PerfEngine {
    config: ResolvedConfig,
    channels: Vec<Arc<Channel>>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ReportSink>,
    csv_file: Option<PathBuf>,
    run: Mutex<RunState>,
}

impl PerfEngine {
    /// Validate `config` and create the channels for `workers` workers
    pub fn new(
        config: &PerfConfig,
        workers: usize,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self, ConfigError> {
        validate_workers(workers)?;
        let config = config.resolve()?;
        let channels = match config.layout {
            ChannelLayout::Shared { shards } => {
                if workers > shards {
                    warn!(
                        "{} workers share {} queues; some queues get several writers",
                        workers, shards
                    );
                }
                vec![Arc::new(Channel::new(shards)?)]
            }
            ChannelLayout::PerWorker { shards } => (0..workers)
                .map(|_| Channel::new(shards).map(Arc::new))
                .collect::<Result<Vec<_>, _>>()?,
        };
        debug!(
            "Created {} channel(s) for {} worker(s), layout {:?}",
            channels.len(),
            workers,
            config.layout
        );

        Ok(Self {
            clock: Arc::new(SystemClock::new(config.time_unit)),
            config,
            channels,
            sink,
            csv_file: None,
            run: Mutex::new(RunState::Idle),
        })
    }

    /// Replace the run clock; workers must timestamp with the same clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record every raw sample to `path` for full-fidelity final percentiles
    pub fn with_csv_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.csv_file = Some(path.into());
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Sender bound to the channel and shard assigned to `worker_id`
    pub fn acquire_channel(&self, worker_id: usize) -> ChannelSender {
        match self.config.layout {
            ChannelLayout::Shared { .. } => ChannelSender::new(self.channels[0].clone(), worker_id),
            ChannelLayout::PerWorker { .. } => {
                let count = self.channels.len();
                ChannelSender::new(self.channels[worker_id % count].clone(), worker_id / count)
            }
        }
    }

    /// Sender spreading records over all shards of the worker's own channel
    pub fn acquire_rotating_channel(&self, worker_id: usize) -> Result<ChannelSender> {
        match self.config.layout {
            ChannelLayout::PerWorker { .. } => {
                let channel = self.channels[worker_id % self.channels.len()].clone();
                Ok(ChannelSender::rotating(channel))
            }
            ChannelLayout::Shared { .. } => Err(anyhow!(
                "rotating senders need per-worker channels; the shared channel has other writers"
            )),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.run.lock(), RunState::Running { .. })
    }

    /// Start the aggregator, or return the handle of the run in flight
    ///
    /// `seconds_to_run` and `total_records` of zero leave the run unbounded.
    pub fn start(&self, start_time: u64, seconds_to_run: u64, total_records: u64) -> Result<RunHandle> {
        let mut run = self.run.lock();
        if let RunState::Running { handle, .. } = &*run {
            debug!("Aggregator already running; returning its handle");
            return Ok(handle.clone());
        }

        let aggregator = self.build_aggregator(start_time, seconds_to_run, total_records)?;
        let handle = RunHandle::new();
        let guard = CompletionGuard(handle.completion.clone());
        let thread = std::thread::Builder::new()
            .name("sbk-aggregator".to_string())
            .spawn(move || {
                let _guard = guard;
                let result = aggregator.run();
                if let Err(e) = &result {
                    error!("Aggregator failed: {:#}", e);
                }
                result
            })
            .context("Failed to spawn the aggregator thread")?;

        info!(
            "Measurement started: {} channel(s), {}ms reporting interval",
            self.channels.len(),
            self.config.reporting_ms
        );
        *run = RunState::Running {
            handle: handle.clone(),
            thread,
        };
        Ok(handle)
    }

    /// End the current run and return its final report
    ///
    /// Returns `Ok(None)` when no run is in progress.
    pub fn stop(&self, end_time: u64) -> Result<Option<WindowReport>> {
        let mut run = self.run.lock();
        let (handle, thread) = match std::mem::replace(&mut *run, RunState::Idle) {
            RunState::Idle => {
                debug!("Stop requested with no run in progress");
                return Ok(None);
            }
            RunState::Running { handle, thread } => (handle, thread),
        };

        if !handle.is_finished() {
            for channel in &self.channels {
                channel.send_end(end_time);
            }
        }
        let joined = thread.join();
        // Leftovers must not leak into the next run, whatever this one's fate.
        for channel in &self.channels {
            channel.clear();
        }
        let result = joined.map_err(|_| anyhow!("Aggregator thread panicked"))?;
        info!("Measurement stopped");
        result.map(Some)
    }

    fn build_aggregator(
        &self,
        start_time: u64,
        seconds_to_run: u64,
        total_records: u64,
    ) -> Result<Aggregator> {
        let unit = self.config.time_unit;
        let percentiles = PercentileSet::from_config(&self.config);

        let periodic = PeriodicWindow::new(
            LatencyWindow::new(
                LatencyHistogram::new(self.config.base_latency, self.config.max_window_latency)?,
                percentiles.clone(),
                start_time,
                unit,
            ),
            self.config.reporting_ms,
            self.config.idle_ns,
        );

        let cumulative = LatencyWindow::new(
            LatencyHistogram::new(self.config.base_latency, self.config.max_latency)?,
            percentiles,
            start_time,
            unit,
        );
        let total: Box<dyn LatencyRecordWindow> = match &self.csv_file {
            Some(path) => Box::new(
                CsvLatencyWriter::create(path, cumulative, unit)
                    .context("Failed to open the full-fidelity latency store")?,
            ),
            None => Box::new(cumulative),
        };

        let limits = RunLimits {
            start_time,
            run_ticks: seconds_to_run * unit.ticks_per_sec(),
            total_records,
        };
        let readers = self
            .channels
            .iter()
            .map(|c| ChannelReader::new(c.clone()))
            .collect();

        Ok(Aggregator::new(
            readers,
            periodic,
            total,
            self.clock.clone(),
            self.sink.clone(),
            limits,
        ))
    }
}

impl Drop for PerfEngine {
    fn drop(&mut self) {
        if let RunState::Running { thread, .. } =
            std::mem::replace(self.run.get_mut(), RunState::Idle)
        {
            let end_time = self.clock.now();
            for channel in &self.channels {
                channel.send_end(end_time);
            }
            if thread.join().is_err() {
                warn!("Aggregator thread panicked during shutdown");
            }
        }
    }
}
