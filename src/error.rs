//! Typed errors for the measurement engine.
//!
//! Configuration errors are raised before any thread starts. Persistence
//! errors only occur when the full-fidelity CSV path was requested.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid engine configuration, reported at construction time
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max latency {max} must be greater than the base latency {base}")]
    InvalidLatencyBounds { base: u64, max: u64 },

    #[error("max window latency {max} must be greater than the base latency {base}")]
    InvalidWindowLatencyBounds { base: u64, max: u64 },

    #[error("latency range of {buckets} buckets exceeds the limit of {limit}")]
    HistogramTooLarge { buckets: u64, limit: u64 },

    #[error("percentile {0} is outside the range [0, 100)")]
    InvalidPercentile(f64),

    #[error("at least one percentile must be configured")]
    NoPercentiles,

    #[error("the engine needs at least one worker")]
    ZeroWorkers,

    #[error("a channel needs at least one shard")]
    ZeroShards,
}

/// Failure of the full-fidelity latency store
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to open latency file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write latency file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to flush latency file {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read latency file {path} at record {line}: {source}")]
    Read {
        path: PathBuf,
        line: u64,
        #[source]
        source: csv::Error,
    },
}
