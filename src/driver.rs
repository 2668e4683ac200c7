//! # In-Memory Benchmark Driver
//!
//! A storage backend living entirely in process memory plus the writer and
//! reader loops that drive it. It exercises the measurement engine without
//! any external system and serves as the reference for real backends: a
//! backend only has to open, write and read; timing and reporting are the
//! engine's business.
//!
//! Writers stamp the first eight bytes of every record with the write start
//! time. Readers use the stamp to report end-to-end latency when
//! `end_to_end` is set, and the read call's own latency otherwise.

use crate::channel::ChannelSender;
use crate::idle::Clock;
use anyhow::{bail, Result};
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

const STAMP_LEN: usize = 8;

/// Minimal storage adapter contract
pub trait Storage: Send + Sync {
    fn open(&self) -> Result<()>;

    fn write(&self, data: &[u8]) -> Result<()>;

    /// Next available record, or `None` if nothing is stored right now
    fn read(&self) -> Result<Option<Vec<u8>>>;

    fn close(&self) -> Result<()>;
}

/// Unbounded in-memory record queue
#[derive(Debug, Default)]
pub struct RamStorage {
    records: SegQueue<Vec<u8>>,
    open: AtomicBool,
}

impl RamStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Storage for RamStorage {
    fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            bail!("RAM storage is not open");
        }
        self.records.push(data.to_vec());
        Ok(())
    }

    fn read(&self) -> Result<Option<Vec<u8>>> {
        if !self.open.load(Ordering::Acquire) {
            bail!("RAM storage is not open");
        }
        Ok(self.records.pop())
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}

/// Per-worker stop conditions; zero disables a condition
#[derive(Debug, Clone, Copy)]
pub struct WorkerParams {
    pub record_size: usize,
    pub records: u64,
    /// Run length in ticks of the run clock
    pub run_ticks: u64,
    pub end_to_end: bool,
}

/// Shared stop flag and live-writer count of one benchmark run
#[derive(Debug, Default)]
pub struct RunControl {
    stop: AtomicBool,
    writers: AtomicUsize,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn writer_started(&self) {
        self.writers.fetch_add(1, Ordering::AcqRel);
    }

    fn writer_finished(&self) {
        self.writers.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn writers_active(&self) -> usize {
        self.writers.load(Ordering::Acquire)
    }
}

/// Keeps the live-writer count honest even when a writer errors out
struct WriterGuard<'a>(&'a RunControl);

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.0.writer_finished();
    }
}

fn limit_reached(params: &WorkerParams, count: u64, begin: u64, now: u64) -> bool {
    (params.records > 0 && count >= params.records)
        || (params.run_ticks > 0 && now.saturating_sub(begin) >= params.run_ticks)
}

/// Write records until a limit is hit or a stop is requested
///
/// The caller must have registered the writer with
/// [`RunControl::writer_started`]. Returns the number of records written.
pub fn run_writer(
    id: usize,
    storage: &dyn Storage,
    sender: &ChannelSender,
    clock: &dyn Clock,
    params: WorkerParams,
    control: &RunControl,
) -> Result<u64> {
    let _guard = WriterGuard(control);
    let mut data = vec![0u8; params.record_size.max(STAMP_LEN)];
    let begin = clock.now();
    let mut count = 0u64;

    while !control.stop_requested() && !limit_reached(&params, count, begin, clock.now()) {
        let start = clock.now();
        data[..STAMP_LEN].copy_from_slice(&start.to_le_bytes());
        storage.write(&data)?;
        let end = clock.now();
        sender.send(data.len() as u64, 1, start, end);
        count += 1;
    }
    debug!("Writer {} finished after {} records", id, count);
    Ok(count)
}

/// Read records until a limit is hit, a stop is requested, or the writers
/// are gone and the storage is drained
pub fn run_reader(
    id: usize,
    storage: &dyn Storage,
    sender: &ChannelSender,
    clock: &dyn Clock,
    params: WorkerParams,
    control: &RunControl,
) -> Result<u64> {
    let begin = clock.now();
    let mut count = 0u64;

    while !control.stop_requested() && !limit_reached(&params, count, begin, clock.now()) {
        // Sampled before the read: an empty read after the last writer
        // finished means the storage is drained.
        let writers_done = control.writers_active() == 0;
        let start = clock.now();
        match storage.read()? {
            Some(data) => {
                let end = clock.now();
                let start = if params.end_to_end && data.len() >= STAMP_LEN {
                    let mut stamp = [0u8; STAMP_LEN];
                    stamp.copy_from_slice(&data[..STAMP_LEN]);
                    u64::from_le_bytes(stamp)
                } else {
                    start
                };
                sender.send(data.len() as u64, 1, start, end);
                count += 1;
            }
            None if writers_done => break,
            None => std::thread::yield_now(),
        }
    }
    debug!("Reader {} finished after {} records", id, count);
    Ok(count)
}

/// Split `total` over `workers`, giving the remainder to the first ones
pub fn records_per_worker(total: u64, workers: usize, index: usize) -> u64 {
    if workers == 0 {
        return 0;
    }
    let workers = workers as u64;
    let base = total / workers;
    base + u64::from((index as u64) < total % workers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelReader};
    use crate::idle::ManualClock;

    fn params(records: u64) -> WorkerParams {
        WorkerParams {
            record_size: 16,
            records,
            run_ticks: 0,
            end_to_end: true,
        }
    }

    #[test]
    fn test_storage_must_be_open() {
        let storage = RamStorage::new();
        assert!(storage.write(b"x").is_err());
        storage.open().unwrap();
        storage.write(b"x").unwrap();
        assert_eq!(storage.read().unwrap(), Some(b"x".to_vec()));
        storage.close().unwrap();
        assert!(storage.read().is_err());
    }

    #[test]
    fn test_writer_then_reader() {
        let storage = RamStorage::new();
        storage.open().unwrap();
        let channel = Arc::new(Channel::new(1).unwrap());
        let sender = ChannelSender::new(channel.clone(), 0);
        let clock = ManualClock::new(100, 1);
        let control = RunControl::new();

        control.writer_started();
        let written = run_writer(0, &storage, &sender, &clock, params(5), &control).unwrap();
        assert_eq!(written, 5);
        assert_eq!(storage.len(), 5);
        assert_eq!(control.writers_active(), 0);

        clock.advance(50);
        let read = run_reader(0, &storage, &sender, &clock, params(0), &control).unwrap();
        assert_eq!(read, 5);
        assert!(storage.is_empty());

        let mut reader = ChannelReader::new(channel);
        let samples: Vec<_> = std::iter::from_fn(|| reader.receive()).collect();
        assert_eq!(samples.len(), 10);
        // end-to-end read latency spans the clock advance
        assert!(samples[5..].iter().all(|s| s.latency() >= 50));
        assert!(samples.iter().all(|s| s.bytes() == 16));
    }

    #[test]
    fn test_writer_honours_stop_request() {
        let storage = RamStorage::new();
        storage.open().unwrap();
        let sender = ChannelSender::new(Arc::new(Channel::new(1).unwrap()), 0);
        let clock = ManualClock::new(0, 1);
        let control = RunControl::new();
        control.request_stop();

        control.writer_started();
        let written = run_writer(0, &storage, &sender, &clock, params(0), &control).unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn test_records_per_worker() {
        let split: Vec<u64> = (0..3).map(|i| records_per_worker(10, 3, i)).collect();
        assert_eq!(split, vec![4, 3, 3]);
        assert_eq!(records_per_worker(10, 0, 0), 0);
    }
}
