use crate::config::{PerfConfig, TimeUnit};
use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// SBK RAM - Storage benchmark against an in-process record queue
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Number of writer threads
    #[clap(short = 'w', long, default_value_t = crate::defaults::WRITERS, help_heading = "Core Options")]
    pub writers: usize,

    /// Number of reader threads
    #[clap(short = 'r', long, default_value_t = 0, help_heading = "Core Options")]
    pub readers: usize,

    /// Record size in bytes
    #[clap(short = 's', long, default_value_t = crate::defaults::RECORD_SIZE, help_heading = "Core Options")]
    pub size: usize,

    /// Records to write in total (ignored if time is specified)
    #[clap(short = 'n', long, help_heading = "Core Options")]
    pub records: Option<u64>,

    /// Duration of the run, e.g. "30s", "5m" (takes precedence over records)
    #[clap(short = 't', long, value_parser = parse_duration, help_heading = "Core Options")]
    pub time: Option<Duration>,

    /// Report read latency from the write timestamp instead of the read call
    #[clap(long, action = ArgAction::Set, default_value_t = true)]
    pub end_to_end: bool,

    /// Store every sample in this CSV file for exact final percentiles
    #[clap(long)]
    pub csv: Option<PathBuf>,

    /// Append every report to this file as one JSON object per line
    #[clap(long)]
    pub json_output: Option<PathBuf>,

    /// JSON file with engine settings; command-line options override it
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Periodic reporting interval in milliseconds
    #[clap(long)]
    pub reporting_ms: Option<u64>,

    /// Shard count of one channel shared by all workers (0 = one channel per worker)
    #[clap(long)]
    pub max_qs: Option<usize>,

    /// Shard count of each per-worker channel
    #[clap(long)]
    pub q_per_worker: Option<usize>,

    /// Time unit of timestamps and latencies
    #[clap(long, value_enum)]
    pub time_unit: Option<TimeUnit>,

    /// Percentiles to report
    #[clap(long, num_args = 1..)]
    pub percentiles: Option<Vec<f64>>,

    /// Colorize log output
    #[clap(long, action = ArgAction::Set, default_value_t = true)]
    pub color: bool,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    /// Engine configuration: the config file (or defaults) overlaid with options
    pub fn perf_config(&self) -> Result<PerfConfig> {
        let mut config = match &self.config {
            Some(path) => PerfConfig::from_json_file(path)?,
            None => PerfConfig::default(),
        };
        if let Some(ms) = self.reporting_ms {
            config.reporting_ms = ms;
        }
        if let Some(qs) = self.max_qs {
            config.max_qs = qs;
        }
        if let Some(qs) = self.q_per_worker {
            config.q_per_worker = qs;
        }
        if let Some(unit) = self.time_unit {
            config.time_unit = unit;
        }
        if let Some(percentiles) = &self.percentiles {
            config.percentiles = percentiles.clone();
        }
        Ok(config)
    }

    pub fn workers(&self) -> usize {
        self.writers + self.readers
    }

    /// Seconds to run, zero when the run is bounded by records
    pub fn seconds_to_run(&self) -> u64 {
        self.time.map(|d| d.as_secs().max(1)).unwrap_or(0)
    }

    /// Records to write, zero when the run is bounded by time
    pub fn total_records(&self) -> u64 {
        if self.time.is_some() {
            0
        } else {
            self.records.unwrap_or(crate::defaults::RECORDS)
        }
    }

    /// Reject argument combinations the run cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.writers == 0 && self.readers == 0 {
            bail!("At least one writer or reader is required");
        }
        if self.writers == 0 && self.time.is_none() {
            bail!("A reader-only run needs a duration (--time)");
        }
        if self.size < 8 {
            bail!("Record size must be at least 8 bytes, got {}", self.size);
        }
        Ok(())
    }
}

/// Run length such as "250ms", "1.5m" or "2h"; a bare number means seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, millis) = [("ms", 1.0), ("s", 1e3), ("m", 60e3), ("h", 3600e3)]
        .iter()
        .find_map(|&(suffix, millis)| s.strip_suffix(suffix).map(|v| (v, millis)))
        .unwrap_or((s, 1e3));

    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a run length; use e.g. 30s, 250ms, 5m or 1h", s))?;
    if value <= 0.0 {
        return Err(format!("Run length must be positive, got '{}'", s));
    }
    Duration::try_from_secs_f64(value * millis / 1e3)
        .map_err(|_| format!("Run length '{}' is out of range", s))
}
