//! # Engine Configuration
//!
//! `PerfConfig` is the user-facing configuration surface of the measurement
//! engine. It can be built from defaults, loaded from a JSON file, or filled
//! in by the command line layer. Before an engine is created the config is
//! resolved into a [`ResolvedConfig`]: floors are applied to the tuning knobs,
//! latency bounds are validated and percentiles are converted to sorted
//! fractions.
//!
//! ## Units
//!
//! All latency bounds are expressed in the run's [`TimeUnit`]. The reporting
//! interval is always given in milliseconds and converted to ticks of the
//! run's unit by the aggregator.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tuning floors and defaults
pub mod defaults {
    pub const MS_PER_SEC: u64 = 1_000;
    pub const NS_PER_MS: u64 = 1_000_000;

    /// Smallest sleep the aggregator performs while idle
    pub const MIN_IDLE_NS: u64 = 100;
    pub const DEFAULT_IDLE_NS: u64 = 10_000;

    pub const MIN_REPORTING_INTERVAL_MS: u64 = 100;
    pub const DEFAULT_REPORTING_INTERVAL_MS: u64 = 5_000;

    pub const DEFAULT_MIN_LATENCY: u64 = 0;
    /// Upper bound of the periodic window histogram (1 minute in ms)
    pub const DEFAULT_WINDOW_LATENCY: u64 = 60 * 1_000;
    /// Upper bound of the cumulative histogram (3 minutes in ms)
    pub const DEFAULT_MAX_LATENCY: u64 = 3 * 60 * 1_000;

    pub const MIN_Q_PER_WORKER: usize = 1;

    /// Largest bucket array a histogram may allocate
    pub const MAX_HISTOGRAM_BUCKETS: u64 = 1 << 28;

    pub const PERCENTILES: [f64; 8] = [10.0, 25.0, 50.0, 75.0, 95.0, 99.0, 99.9, 99.99];
}

/// Unit shared by every timestamp and latency value of a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    #[clap(name = "ms")]
    Milliseconds,
    #[clap(name = "us")]
    Microseconds,
    #[clap(name = "ns")]
    Nanoseconds,
}

impl TimeUnit {
    /// Short unit tag, used in report headers
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Microseconds => "us",
            TimeUnit::Nanoseconds => "ns",
        }
    }

    pub fn ticks_per_ms(&self) -> u64 {
        match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Nanoseconds => defaults::NS_PER_MS,
        }
    }

    pub fn ticks_per_sec(&self) -> u64 {
        self.ticks_per_ms() * defaults::MS_PER_SEC
    }

    /// Convert a std duration into ticks of this unit
    pub fn from_duration(&self, duration: std::time::Duration) -> u64 {
        match self {
            TimeUnit::Milliseconds => duration.as_millis() as u64,
            TimeUnit::Microseconds => duration.as_micros() as u64,
            TimeUnit::Nanoseconds => duration.as_nanos() as u64,
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing configuration of the measurement engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    /// Sleep granularity of an idle aggregator, in nanoseconds
    pub idle_ns: u64,

    /// Reporting interval of the periodic window, in milliseconds
    pub reporting_ms: u64,

    /// Base latency of both histograms; smaller values are discarded
    pub min_latency: u64,

    /// Exclusive upper latency bound of the periodic window
    pub max_window_latency: u64,

    /// Exclusive upper latency bound of the cumulative window
    pub max_latency: u64,

    /// Shard count of a single channel shared by all workers.
    /// Zero selects one channel per worker instead.
    pub max_qs: usize,

    /// Shard count of each per-worker channel
    pub q_per_worker: usize,

    /// Percentiles to report, in percent (e.g. 99.9)
    pub percentiles: Vec<f64>,

    pub time_unit: TimeUnit,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            idle_ns: defaults::DEFAULT_IDLE_NS,
            reporting_ms: defaults::DEFAULT_REPORTING_INTERVAL_MS,
            min_latency: defaults::DEFAULT_MIN_LATENCY,
            max_window_latency: defaults::DEFAULT_WINDOW_LATENCY,
            max_latency: defaults::DEFAULT_MAX_LATENCY,
            max_qs: 0,
            q_per_worker: defaults::MIN_Q_PER_WORKER,
            percentiles: defaults::PERCENTILES.to_vec(),
            time_unit: TimeUnit::default(),
        }
    }
}

impl PerfConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: PerfConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Apply floors and validate bounds
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let base = self.min_latency;
        if self.max_latency <= base {
            return Err(ConfigError::InvalidLatencyBounds {
                base,
                max: self.max_latency,
            });
        }
        if self.max_window_latency <= base {
            return Err(ConfigError::InvalidWindowLatencyBounds {
                base,
                max: self.max_window_latency,
            });
        }
        for span in [self.max_latency - base, self.max_window_latency - base] {
            if span > defaults::MAX_HISTOGRAM_BUCKETS {
                return Err(ConfigError::HistogramTooLarge {
                    buckets: span,
                    limit: defaults::MAX_HISTOGRAM_BUCKETS,
                });
            }
        }

        if self.percentiles.is_empty() {
            return Err(ConfigError::NoPercentiles);
        }
        let mut percentiles = self.percentiles.clone();
        for &p in &percentiles {
            if !(0.0..100.0).contains(&p) {
                return Err(ConfigError::InvalidPercentile(p));
            }
        }
        percentiles.sort_by(|a, b| a.total_cmp(b));
        let fractions = percentiles.iter().map(|p| p / 100.0).collect();

        let layout = if self.max_qs > 0 {
            ChannelLayout::Shared {
                shards: self.max_qs,
            }
        } else {
            ChannelLayout::PerWorker {
                shards: self.q_per_worker.max(defaults::MIN_Q_PER_WORKER),
            }
        };

        Ok(ResolvedConfig {
            idle_ns: self.idle_ns.max(defaults::MIN_IDLE_NS),
            reporting_ms: self.reporting_ms.max(defaults::MIN_REPORTING_INTERVAL_MS),
            base_latency: base,
            max_window_latency: self.max_window_latency,
            max_latency: self.max_latency,
            layout,
            percentiles,
            fractions,
            time_unit: self.time_unit,
        })
    }
}

/// How worker samples are spread over channels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelLayout {
    /// One channel with `shards` queues, shared by every worker
    Shared { shards: usize },
    /// One channel per worker, each with `shards` queues
    PerWorker { shards: usize },
}

/// Validated configuration consumed by the engine
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedConfig {
    pub idle_ns: u64,
    pub reporting_ms: u64,
    pub base_latency: u64,
    pub max_window_latency: u64,
    pub max_latency: u64,
    pub layout: ChannelLayout,
    /// Sorted percentiles in percent, as reported
    pub percentiles: Vec<f64>,
    /// The same percentiles as fractions in [0, 1)
    pub fractions: Vec<f64>,
    pub time_unit: TimeUnit,
}
