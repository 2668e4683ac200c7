//! # SBK RAM - Main Entry Point
//!
//! Runs writer and reader threads against an in-process record queue and
//! measures them with the SBK measurement engine.
//!
//! The main function:
//! 1. **Parses arguments** and initializes logging
//! 2. **Builds the engine** with its report sinks and optional CSV store
//! 3. **Starts the aggregator**, then the workers on Tokio's blocking pool
//! 4. **Stops the engine** once every worker is done, or on ctrl-c
//!
//! Workers are plain blocking loops; Tokio only hosts them and watches for
//! the interrupt signal.

use anyhow::{Context, Result};
use clap::Parser;
use sbk_perf::{
    cli::Args,
    driver::{self, RamStorage, RunControl, Storage, WorkerParams},
    logging, utils, JsonLinesSink, LogSink, PerfEngine, ReportSink, TeeSink,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose, args.color);
    args.validate()?;

    info!("Starting SBK RAM benchmark v{}", sbk_perf::VERSION);
    debug!("Configuration: {:?}", args);

    let config = args.perf_config()?;
    let cores = utils::get_cpu_count();
    if args.workers() + 1 > cores {
        warn!(
            "{} workers plus the aggregator exceed {} CPU cores; latencies include scheduling delays",
            args.workers(),
            cores
        );
    }
    let action = match (args.writers, args.readers) {
        (_, 0) => "Writing",
        (0, _) => "Reading",
        _ => "Write/Reading",
    };
    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(LogSink::new(action))];
    if let Some(path) = &args.json_output {
        info!("Streaming reports to: {:?}", path);
        sinks.push(Box::new(JsonLinesSink::create(path)?));
    }
    let sink: Arc<dyn ReportSink> = Arc::new(TeeSink::new(sinks));

    let mut engine = PerfEngine::new(&config, args.workers(), sink)?;
    if let Some(path) = &args.csv {
        info!("Recording every sample to: {:?}", path);
        engine = engine.with_csv_file(path);
    }
    let engine = Arc::new(engine);
    let clock = engine.clock();

    let storage = Arc::new(RamStorage::new());
    storage.open()?;
    let control = Arc::new(RunControl::new());

    let seconds = args.seconds_to_run();
    let total_records = args.total_records();
    // Reads count as records too; only a write-only run is bounded by the
    // aggregator's record count.
    let engine_records = if args.readers == 0 { total_records } else { 0 };
    let run = engine.start(clock.now(), seconds, engine_records)?;

    let interrupt = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping workers");
            interrupt.request_stop();
        }
    });

    let run_ticks = seconds * config.time_unit.ticks_per_sec();
    let mut workers = Vec::with_capacity(args.workers());
    for id in 0..args.writers {
        let params = WorkerParams {
            record_size: args.size,
            records: driver::records_per_worker(total_records, args.writers, id),
            run_ticks,
            end_to_end: args.end_to_end,
        };
        let sender = engine.acquire_channel(id);
        let (storage, clock, control) = (storage.clone(), clock.clone(), control.clone());
        control.writer_started();
        workers.push(tokio::task::spawn_blocking(move || {
            driver::run_writer(id, &*storage, &sender, &*clock, params, &control)
        }));
    }
    for n in 0..args.readers {
        let id = args.writers + n;
        let params = WorkerParams {
            record_size: args.size,
            records: 0,
            run_ticks,
            end_to_end: args.end_to_end,
        };
        let sender = engine.acquire_channel(id);
        let (storage, clock, control) = (storage.clone(), clock.clone(), control.clone());
        workers.push(tokio::task::spawn_blocking(move || {
            driver::run_reader(id, &*storage, &sender, &*clock, params, &control)
        }));
    }

    let mut failure = None;
    let mut completed = 0u64;
    for worker in workers {
        match worker.await.context("Worker task panicked")? {
            Ok(records) => completed += records,
            Err(e) => {
                error!("Worker failed: {:#}", e);
                control.request_stop();
                failure.get_or_insert(e);
            }
        }
    }
    if run.is_finished() {
        debug!("Aggregator reached its limit before the workers finished");
    }

    let end_time = clock.now();
    let stopper = engine.clone();
    let report = tokio::task::spawn_blocking(move || stopper.stop(end_time))
        .await
        .context("Engine stop task panicked")??;
    storage.close()?;

    if let Some(report) = report {
        info!(
            "Benchmark finished: {} operations by workers, {} records reported",
            completed, report.records
        );
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
