use anyhow::Result;
use sbk_perf::driver::{self, RamStorage, RunControl, Storage, WorkerParams};
use sbk_perf::{Clock, ManualClock, MemorySink, PerfConfig, PerfEngine, TimeUnit};
use std::sync::Arc;
use std::time::Duration;

fn config() -> PerfConfig {
    PerfConfig {
        reporting_ms: 200,
        percentiles: vec![50.0, 99.0],
        ..PerfConfig::default()
    }
}

/// Stopping an engine that never started is a no-op.
#[test]
fn stop_without_start_returns_nothing() -> Result<()> {
    let sink = Arc::new(MemorySink::new());
    let engine = PerfEngine::new(&config(), 2, sink.clone())?;

    assert!(engine.stop(0)?.is_none());
    assert!(!engine.is_running());
    assert!(sink.totals().is_empty());
    Ok(())
}

/// Every sample sent from concurrent worker threads reaches the final report.
#[test]
fn concurrent_workers_are_fully_counted() -> Result<()> {
    for max_qs in [0, 2] {
        let sink = Arc::new(MemorySink::new());
        let engine = PerfEngine::new(
            &PerfConfig {
                max_qs,
                ..config()
            },
            4,
            sink.clone(),
        )?;
        let clock = engine.clock();
        engine.start(clock.now(), 0, 0)?;

        std::thread::scope(|scope| {
            for id in 0..4 {
                let sender = engine.acquire_channel(id);
                let clock = clock.clone();
                scope.spawn(move || {
                    for _ in 0..1_000 {
                        let start = clock.now();
                        sender.send(64, 1, start, clock.now());
                    }
                });
            }
        });

        let report = engine.stop(clock.now())?.expect("run was started");
        assert_eq!(report.records, 4_000, "max_qs = {}", max_qs);
        assert_eq!(report.bytes, 4_000 * 64);
        assert_eq!(sink.totals().len(), 1);
    }
    Ok(())
}

/// A second start while running hands back the run in flight.
#[test]
fn start_is_idempotent_while_running() -> Result<()> {
    let engine = PerfEngine::new(&config(), 1, Arc::new(MemorySink::new()))?;
    let first = engine.start(0, 0, 0)?;
    let second = engine.start(5, 0, 0)?;
    assert!(first.same_run(&second));

    engine.stop(10)?;
    assert!(first.is_finished());
    assert!(!engine.is_running());
    Ok(())
}

/// The aggregator ends the run on its own once the record count is reached.
#[test]
fn record_limit_finishes_run() -> Result<()> {
    let clock = Arc::new(ManualClock::new(0, 1));
    let sink = Arc::new(MemorySink::new());
    let engine = PerfEngine::new(&config(), 1, sink.clone())?.with_clock(clock.clone());

    let run = engine.start(0, 0, 10)?;
    let sender = engine.acquire_channel(0);
    for i in 0..20 {
        sender.send(8, 1, i, i + 2);
    }
    assert!(run.wait_timeout(Duration::from_secs(10)));

    let report = engine.stop(clock.now())?.expect("run was started");
    assert_eq!(report.records, 10);
    assert_eq!(report.percentile(50.0), Some(2));
    Ok(())
}

/// An idle run bounded by time ends by itself and still prints periodic reports.
#[test]
fn time_limit_finishes_idle_run() -> Result<()> {
    let clock = Arc::new(ManualClock::new(0, 1));
    let sink = Arc::new(MemorySink::new());
    let engine = PerfEngine::new(&config(), 1, sink.clone())?.with_clock(clock.clone());

    let run = engine.start(0, 1, 0)?;
    assert!(run.wait_timeout(Duration::from_secs(10)));
    assert!(clock.now() >= TimeUnit::Milliseconds.ticks_per_sec());

    let report = engine.stop(clock.now())?.expect("run was started");
    assert_eq!(report.records, 0);
    assert!(!sink.periodic().is_empty());
    Ok(())
}

/// Writers and readers of the in-memory driver, measured end to end.
#[test]
fn ram_driver_round_trip() -> Result<()> {
    let sink = Arc::new(MemorySink::new());
    let engine = PerfEngine::new(&config(), 2, sink.clone())?;
    let clock = engine.clock();
    let storage = Arc::new(RamStorage::new());
    storage.open()?;
    let control = Arc::new(RunControl::new());

    engine.start(clock.now(), 0, 0)?;
    let params = WorkerParams {
        record_size: 128,
        records: 500,
        run_ticks: 0,
        end_to_end: true,
    };
    control.writer_started();

    let (written, read) = std::thread::scope(|scope| {
        let writer = {
            let sender = engine.acquire_channel(0);
            let (storage, clock, control) = (&storage, &clock, &control);
            scope.spawn(move || {
                driver::run_writer(0, storage.as_ref(), &sender, clock.as_ref(), params, control)
            })
        };
        let reader = {
            let sender = engine.acquire_channel(1);
            let params = WorkerParams { records: 0, ..params };
            let (storage, clock, control) = (&storage, &clock, &control);
            scope.spawn(move || {
                driver::run_reader(1, storage.as_ref(), &sender, clock.as_ref(), params, control)
            })
        };
        (writer.join(), reader.join())
    });
    let written = written.expect("writer panicked")?;
    let read = read.expect("reader panicked")?;
    assert_eq!(written, 500);
    assert_eq!(read, 500);

    let report = engine.stop(clock.now())?.expect("run was started");
    assert_eq!(report.records, 1_000);
    assert_eq!(report.bytes, 1_000 * 128);
    Ok(())
}
