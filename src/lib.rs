//! # SBK Measurement Engine
//!
//! The statistics pipeline of the storage benchmark kit. Benchmark workers
//! drive a storage or messaging backend and report one timing sample per
//! completed operation; this library turns those samples into periodic and
//! final throughput and latency reports while perturbing the measured
//! workload as little as possible.
//!
//! ## Architecture Overview
//!
//! ```text
//! worker ──send──▶ Channel shard ──poll──▶ Aggregator ──▶ PeriodicWindow ──▶ ReportSink::print
//! worker ──send──▶ Channel shard ──poll──▶     │
//!                                              └────────▶ cumulative window ──▶ ReportSink::print_total
//! ```
//!
//! - `channel`: sharded lock-free sample queues, one writer per shard
//! - `histogram`: bounded bucketed latency recorder with fused percentile
//!   extraction
//! - `window`: periodic and cumulative windows and the report record
//! - `idle`: adaptive idle backoff and the injectable run clock
//! - `aggregator`: the single-consumer state machine
//! - `engine`: lifecycle façade handing out channels and running the
//!   aggregator
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use sbk_perf::{LogSink, PerfConfig, PerfEngine};
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = PerfEngine::new(&PerfConfig::default(), 1, Arc::new(LogSink::new("Writing")))?;
//!     let clock = engine.clock();
//!     let sender = engine.acquire_channel(0);
//!
//!     engine.start(clock.now(), 0, 0)?;
//!     let start = clock.now();
//!     // ... perform one write ...
//!     sender.send(1024, 1, start, clock.now());
//!
//!     let report = engine.stop(clock.now())?;
//!     println!("{:?}", report);
//!     Ok(())
//! }
//! ```

/// Sharded sample channels
///
/// Workers write through a `ChannelSender` pinned to one shard; the
/// aggregator polls all shards round-robin through a `ChannelReader`.
pub mod channel;

pub mod sample;

/// Bucketed latency histogram
///
/// O(1) recording, single-pass percentile extraction that also clears the
/// buckets, and exact accounting of discarded out-of-range latencies.
pub mod histogram;

pub mod window;

/// Adaptive idle backoff and run clocks
pub mod idle;

/// Single-consumer aggregation loop and its state machine
pub mod aggregator;

/// Lifecycle façade of the pipeline
///
/// Creates the channels, hands one to each worker, and starts and stops the
/// aggregator exactly once per run.
pub mod engine;

/// Optional full-fidelity CSV store of raw samples
pub mod persist;

/// Reporting sinks: tracing log lines, JSON lines, in-memory capture
pub mod sink;

/// Engine configuration, floors and validation
pub mod config;

pub mod error;

/// In-memory storage backend and worker loops used by the `sbk-ram` binary
pub mod driver;

/// Command-line interface of the `sbk-ram` binary
pub mod cli;

pub mod logging;

pub mod utils;

pub use aggregator::{Aggregator, AggregatorState, RunLimits};
pub use channel::{Channel, ChannelReader, ChannelSender};
pub use config::{PerfConfig, TimeUnit};
pub use engine::{PerfEngine, RunHandle};
pub use error::{ConfigError, PersistError};
pub use histogram::LatencyHistogram;
pub use idle::{Clock, IdleController, ManualClock, SystemClock};
pub use sample::Sample;
pub use sink::{JsonLinesSink, LogSink, MemorySink, ReportSink, TeeSink};
pub use window::{PercentileValue, WindowReport};

/// The current version of the measurement engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Defaults of the `sbk-ram` benchmark driver
pub mod defaults {
    /// Size of each written record in bytes
    pub const RECORD_SIZE: usize = 1024;

    /// Records written when neither a count nor a duration is given
    pub const RECORDS: u64 = 100_000;

    pub const WRITERS: usize = 1;
}
