//! Timing record of a single completed operation.

use serde::{Deserialize, Serialize};

/// One completed operation, or the end marker of a channel
///
/// Timestamps are monotonic ticks in the run's time unit. A non-end sample
/// always satisfies `end_time >= start_time` and `events >= 1`; every
/// constructor, deserialization included, goes through the same clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSample")]
pub struct Sample {
    start_time: u64,
    end_time: u64,
    bytes: u64,
    events: u64,
    is_end: bool,
}

/// Wire shape of a sample before its invariants are applied
#[derive(Deserialize)]
struct RawSample {
    start_time: u64,
    end_time: u64,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    events: u64,
    #[serde(default)]
    is_end: bool,
}

impl From<RawSample> for Sample {
    fn from(raw: RawSample) -> Self {
        if raw.is_end {
            Sample::end(raw.end_time)
        } else {
            Sample::new(raw.start_time, raw.end_time, raw.bytes, raw.events)
        }
    }
}

impl Sample {
    /// Create a sample for a completed operation
    ///
    /// An `end_time` earlier than `start_time` is clamped to `start_time` and
    /// zero events are counted as one, so latency is never negative.
    pub fn new(start_time: u64, end_time: u64, bytes: u64, events: u64) -> Self {
        Self {
            start_time,
            end_time: end_time.max(start_time),
            bytes,
            events: events.max(1),
            is_end: false,
        }
    }

    /// Marker telling the aggregator that a channel will carry no more data
    pub fn end(end_time: u64) -> Self {
        Self {
            start_time: end_time,
            end_time,
            bytes: 0,
            events: 0,
            is_end: true,
        }
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn is_end(&self) -> bool {
        self.is_end
    }

    pub fn latency(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}
