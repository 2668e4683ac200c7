//! # Sample Channels
//!
//! A [`Channel`] is the hand-off point between benchmark workers and the
//! aggregator. Each channel owns one or more shards, every shard being an
//! unbounded lock-free FIFO queue. Workers never block on `send`; the
//! aggregator polls shards round-robin through a [`ChannelReader`] and never
//! blocks either.
//!
//! ## Ownership
//!
//! - A worker writes through a [`ChannelSender`] bound to a single shard for
//!   its whole lifetime, so every shard has exactly one writer.
//! - The aggregator is the only reader; the round-robin cursor lives in the
//!   reader it owns, not in the shared channel.
//! - Samples within one shard are observed in send order. There is no
//!   ordering across shards.

use crate::error::ConfigError;
use crate::sample::Sample;
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sharded queue of samples from workers to the aggregator
#[derive(Debug)]
pub struct Channel {
    shards: Box<[SegQueue<Sample>]>,
}

impl Channel {
    /// Create a channel with `shard_count` queues
    pub fn new(shard_count: usize) -> Result<Self, ConfigError> {
        if shard_count == 0 {
            return Err(ConfigError::ZeroShards);
        }
        let shards = (0..shard_count).map(|_| SegQueue::new()).collect();
        Ok(Self { shards })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Enqueue a sample on shard `shard_hint mod shard_count`
    ///
    /// Concurrent callers must each keep using the same hint.
    pub fn send(&self, shard_hint: usize, sample: Sample) {
        self.shards[shard_hint % self.shards.len()].push(sample);
    }

    /// Enqueue the end marker on shard 0
    pub fn send_end(&self, end_time: u64) {
        self.shards[0].push(Sample::end(end_time));
    }

    /// Drop every queued sample; only valid once all workers stopped sending
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            while shard.pop().is_some() {}
        }
    }

    /// Number of samples currently queued across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(SegQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(SegQueue::is_empty)
    }

    fn pop(&self, shard: usize) -> Option<Sample> {
        self.shards[shard].pop()
    }
}

/// Selects the shard a sender writes to
#[derive(Debug)]
enum ShardSelect {
    /// Always the same shard
    Fixed(usize),
    /// Rotate over all shards by record count; requires an exclusive channel
    Rotating(AtomicU64),
}

/// Worker-side handle of a channel
#[derive(Debug)]
pub struct ChannelSender {
    channel: Arc<Channel>,
    select: ShardSelect,
}

impl ChannelSender {
    /// Bind a sender to the shard derived from `shard_hint`
    pub fn new(channel: Arc<Channel>, shard_hint: usize) -> Self {
        let shard = shard_hint % channel.shard_count();
        Self {
            channel,
            select: ShardSelect::Fixed(shard),
        }
    }

    /// Sender that spreads records over every shard of a channel it owns
    pub fn rotating(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            select: ShardSelect::Rotating(AtomicU64::new(0)),
        }
    }

    /// Report one completed operation
    pub fn send(&self, bytes: u64, events: u64, start_time: u64, end_time: u64) {
        let shard = match &self.select {
            ShardSelect::Fixed(shard) => *shard,
            ShardSelect::Rotating(count) => {
                let id = count.fetch_add(1, Ordering::Relaxed);
                (id % self.channel.shard_count() as u64) as usize
            }
        };
        self.channel
            .send(shard, Sample::new(start_time, end_time, bytes, events));
    }

    /// Shard this sender is pinned to, if any
    pub fn shard(&self) -> Option<usize> {
        match self.select {
            ShardSelect::Fixed(shard) => Some(shard),
            ShardSelect::Rotating(_) => None,
        }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }
}

/// Aggregator-side round-robin poller of a channel
#[derive(Debug)]
pub struct ChannelReader {
    channel: Arc<Channel>,
    cursor: usize,
}

impl ChannelReader {
    pub fn new(channel: Arc<Channel>) -> Self {
        // First poll lands on shard 0.
        let cursor = channel.shard_count() - 1;
        Self { channel, cursor }
    }

    /// Advance to the next shard and pop its head, if any
    pub fn receive(&mut self) -> Option<Sample> {
        self.cursor += 1;
        if self.cursor >= self.channel.shard_count() {
            self.cursor = 0;
        }
        self.channel.pop(self.cursor)
    }

    /// Pop from the first non-empty shard within one full rotation
    pub fn receive_any(&mut self) -> Option<Sample> {
        for _ in 0..self.channel.shard_count() {
            if let Some(sample) = self.receive() {
                return Some(sample);
            }
        }
        None
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_shards_rejected() {
        assert_eq!(Channel::new(0).unwrap_err(), ConfigError::ZeroShards);
    }

    #[test]
    fn test_send_uses_shard_modulo() {
        let channel = Arc::new(Channel::new(3).unwrap());
        let sender = ChannelSender::new(channel.clone(), 7);
        assert_eq!(sender.shard(), Some(1));

        sender.send(10, 1, 0, 5);
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.pop(1).unwrap().latency(), 5);
    }

    #[test]
    fn test_shard_fifo_order() {
        let channel = Arc::new(Channel::new(1).unwrap());
        let sender = ChannelSender::new(channel.clone(), 0);
        for i in 0..100 {
            sender.send(i, 1, i, i + 1);
        }

        let mut reader = ChannelReader::new(channel);
        let received: Vec<u64> = std::iter::from_fn(|| reader.receive())
            .map(|s| s.bytes())
            .collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_fifo_under_concurrent_producers() {
        let channel = Arc::new(Channel::new(4).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let sender = ChannelSender::new(channel.clone(), worker);
                std::thread::spawn(move || {
                    for seq in 0..1_000u64 {
                        sender.send(worker as u64, 1, seq, seq);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut reader = ChannelReader::new(channel.clone());
        let mut last_seen = [None::<u64>; 4];
        while let Some(sample) = reader.receive_any() {
            let worker = sample.bytes() as usize;
            if let Some(prev) = last_seen[worker] {
                assert!(sample.start_time() > prev);
            }
            last_seen[worker] = Some(sample.start_time());
        }
        assert!(last_seen.iter().all(|s| *s == Some(999)));
        assert!(channel.is_empty());
    }

    #[test]
    fn test_round_robin_receive() {
        let channel = Arc::new(Channel::new(2).unwrap());
        channel.send(0, Sample::new(0, 1, 0, 1));
        channel.send(1, Sample::new(0, 2, 0, 1));

        let mut reader = ChannelReader::new(channel);
        assert_eq!(reader.receive().unwrap().end_time(), 1);
        assert_eq!(reader.receive().unwrap().end_time(), 2);
        assert!(reader.receive().is_none());
    }

    #[test]
    fn test_end_marker_goes_to_shard_zero() {
        let channel = Arc::new(Channel::new(3).unwrap());
        channel.send_end(42);
        let end = channel.pop(0).unwrap();
        assert!(end.is_end());
        assert_eq!(end.end_time(), 42);
    }

    #[test]
    fn test_rotating_sender_spreads_records() {
        let channel = Arc::new(Channel::new(2).unwrap());
        let sender = ChannelSender::rotating(channel.clone());
        assert_eq!(sender.shard(), None);
        for _ in 0..4 {
            sender.send(1, 1, 0, 0);
        }
        assert_eq!(channel.shards[0].len(), 2);
        assert_eq!(channel.shards[1].len(), 2);
    }

    #[test]
    fn test_clear_drains_all_shards() {
        let channel = Channel::new(3).unwrap();
        for shard in 0..3 {
            channel.send(shard, Sample::new(0, 1, 0, 1));
        }
        channel.send_end(5);
        channel.clear();
        assert!(channel.is_empty());
        assert_eq!(channel.len(), 0);
    }
}
