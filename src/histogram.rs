//! # Bucketed Latency Histogram
//!
//! A bounded-memory latency recorder: one counter per latency value in
//! `[base_latency, max_latency)` plus aggregate counters. Recording is O(1);
//! percentile extraction is a single forward scan whose cost is bounded by
//! the largest latency actually observed rather than by the configured range.
//!
//! ## Extract-and-clear
//!
//! Percentile extraction zeroes every bucket it visits, so the scan doubles
//! as the bucket reset. [`LatencyHistogram::reset`] only clears the scalar
//! counters; callers must extract before resetting or the stale bucket
//! counts leak into the next interval.

use crate::error::ConfigError;

/// Bucketed latency counters plus running totals
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    valid_records: u64,
    lower_discards: u64,
    higher_discards: u64,
    bytes: u64,
    total_latency: u64,
    max_latency: u64,
    base_latency: u64,
    buckets: Vec<u64>,
}

impl LatencyHistogram {
    /// Create a histogram for latencies in `[base_latency, max_latency)`
    pub fn new(base_latency: u64, max_latency: u64) -> Result<Self, ConfigError> {
        if max_latency <= base_latency {
            return Err(ConfigError::InvalidLatencyBounds {
                base: base_latency,
                max: max_latency,
            });
        }
        Ok(Self {
            valid_records: 0,
            lower_discards: 0,
            higher_discards: 0,
            bytes: 0,
            total_latency: 0,
            max_latency: 0,
            base_latency,
            buckets: vec![0; (max_latency - base_latency) as usize],
        })
    }

    pub fn base_latency(&self) -> u64 {
        self.base_latency
    }

    /// Events recorded inside the bucket range
    pub fn valid_records(&self) -> u64 {
        self.valid_records
    }

    pub fn lower_discards(&self) -> u64 {
        self.lower_discards
    }

    pub fn higher_discards(&self) -> u64 {
        self.higher_discards
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn total_latency(&self) -> u64 {
        self.total_latency
    }

    /// Largest latency recorded, discarded ones included
    pub fn max_latency(&self) -> u64 {
        self.max_latency
    }

    /// Exclusive upper bound of the bucket range
    pub fn latency_bound(&self) -> u64 {
        self.base_latency + self.buckets.len() as u64
    }

    /// Account `events` operations of `latency` each, totalling `bytes`
    pub fn record(&mut self, bytes: u64, events: u64, latency: u64) {
        if latency < self.base_latency {
            self.lower_discards += events;
        } else {
            let index = latency - self.base_latency;
            if index < self.buckets.len() as u64 {
                self.buckets[index as usize] += events;
                self.valid_records += events;
            } else {
                self.higher_discards += events;
            }
        }
        self.bytes = self.bytes.saturating_add(bytes);
        self.total_latency = self
            .total_latency
            .saturating_add(latency.saturating_mul(events));
        self.max_latency = self.max_latency.max(latency);
    }

    /// Every recorded event, valid or discarded
    pub fn total_records(&self) -> u64 {
        self.valid_records + self.lower_discards + self.higher_discards
    }

    /// Mean latency over all records; zero when nothing was recorded
    pub fn mean_latency(&self) -> f64 {
        match self.total_records() {
            0 => 0.0,
            total => self.total_latency as f64 / total as f64,
        }
    }

    /// Compute latency values for ascending `fractions` and zero the buckets
    ///
    /// For each fraction the target rank is `floor(valid_records * fraction)`;
    /// its value is the first bucket whose cumulative count range contains
    /// the rank. Ranks past the last non-empty bucket report zero.
    pub fn extract_and_clear(&mut self, fractions: &[f64]) -> Vec<u64> {
        let mut values = vec![0u64; fractions.len()];
        let ranks: Vec<u64> = fractions
            .iter()
            .map(|f| (self.valid_records as f64 * f) as u64)
            .collect();

        let scan_len = if self.max_latency < self.base_latency {
            0
        } else {
            let observed = self.max_latency - self.base_latency;
            self.buckets.len().min(observed.saturating_add(1).min(usize::MAX as u64) as usize)
        };

        let mut cur = 0u64;
        let mut next = 0usize;
        for (i, bucket) in self.buckets[..scan_len].iter_mut().enumerate() {
            let count = *bucket;
            if count == 0 {
                continue;
            }
            while next < ranks.len() && ranks[next] >= cur && ranks[next] < cur + count {
                values[next] = i as u64 + self.base_latency;
                next += 1;
            }
            cur += count;
            *bucket = 0;
        }
        values
    }

    /// Zero the scalar counters; buckets are cleared by extraction
    pub fn reset(&mut self) {
        self.valid_records = 0;
        self.lower_discards = 0;
        self.higher_discards = 0;
        self.bytes = 0;
        self.total_latency = 0;
        self.max_latency = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic latency stream for property-style checks
    fn pseudo_latencies(seed: u64, count: usize, bound: u64) -> Vec<u64> {
        let mut state = seed;
        (0..count)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 33) % bound
            })
            .collect()
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(LatencyHistogram::new(10, 10).is_err());
        assert!(LatencyHistogram::new(10, 5).is_err());
    }

    #[test]
    fn test_classification() {
        let mut hist = LatencyHistogram::new(10, 20).unwrap();
        hist.record(0, 1, 9);
        hist.record(0, 1, 10);
        hist.record(0, 1, 19);
        hist.record(0, 1, 20);

        assert_eq!(hist.lower_discards(), 1);
        assert_eq!(hist.valid_records(), 2);
        assert_eq!(hist.higher_discards(), 1);
        assert_eq!(hist.buckets[0], 1);
        assert_eq!(hist.buckets[9], 1);
    }

    #[test]
    fn test_conservation_of_events() {
        let mut hist = LatencyHistogram::new(50, 400).unwrap();
        let latencies = pseudo_latencies(7, 5_000, 500);
        let mut events_sum = 0;
        for (i, &latency) in latencies.iter().enumerate() {
            let events = (i % 3 + 1) as u64;
            events_sum += events;
            hist.record(100, events, latency);
        }
        hist.extract_and_clear(&[0.5, 0.99]);

        assert_eq!(hist.total_records(), events_sum);
        assert!(hist.lower_discards() > 0);
        assert!(hist.higher_discards() > 0);
    }

    #[test]
    fn test_percentiles_monotonic() {
        let mut hist = LatencyHistogram::new(0, 1_000).unwrap();
        for latency in pseudo_latencies(42, 10_000, 1_200) {
            hist.record(1, 1, latency);
        }
        let fractions = [0.1, 0.25, 0.5, 0.75, 0.9, 0.99, 0.999];
        let values = hist.extract_and_clear(&fractions);
        for pair in values.windows(2) {
            assert!(pair[0] <= pair[1], "{:?}", values);
        }
    }

    #[test]
    fn test_extract_twice_returns_zeros() {
        let mut hist = LatencyHistogram::new(0, 100).unwrap();
        for latency in [3, 7, 7, 42] {
            hist.record(0, 1, latency);
        }
        let first = hist.extract_and_clear(&[0.25, 0.5, 0.9]);
        assert_eq!(first, vec![7, 7, 42]);

        let second = hist.extract_and_clear(&[0.25, 0.5, 0.9]);
        assert_eq!(second, vec![0, 0, 0]);
        assert!(hist.buckets.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_scenario_mean_max_and_median() {
        let mut hist = LatencyHistogram::new(0, 200).unwrap();
        for latency in [5, 5, 100] {
            hist.record(0, 1, latency);
        }
        assert_eq!(hist.valid_records(), 3);
        assert_eq!(hist.max_latency(), 100);
        assert!((hist.mean_latency() - 36.67).abs() < 0.01);
        assert_eq!(hist.extract_and_clear(&[0.5]), vec![5]);
    }

    #[test]
    fn test_scenario_higher_discard() {
        let mut hist = LatencyHistogram::new(0, 200).unwrap();
        hist.record(0, 1, 250);
        assert_eq!(hist.higher_discards(), 1);
        assert_eq!(hist.valid_records(), 0);
        assert_eq!(hist.extract_and_clear(&[0.5]), vec![0]);
    }

    #[test]
    fn test_empty_histogram() {
        let mut hist = LatencyHistogram::new(0, 10).unwrap();
        assert_eq!(hist.mean_latency(), 0.0);
        assert_eq!(hist.extract_and_clear(&[0.5, 0.99]), vec![0, 0]);
    }

    #[test]
    fn test_base_offset_in_values() {
        let mut hist = LatencyHistogram::new(100, 110).unwrap();
        hist.record(0, 4, 105);
        assert_eq!(hist.extract_and_clear(&[0.0, 0.75]), vec![105, 105]);
    }

    #[test]
    fn test_reset_clears_counters() {
        let mut hist = LatencyHistogram::new(0, 10).unwrap();
        hist.record(64, 2, 4);
        hist.extract_and_clear(&[0.5]);
        hist.reset();
        assert_eq!(hist.total_records(), 0);
        assert_eq!(hist.bytes(), 0);
        assert_eq!(hist.max_latency(), 0);
        assert_eq!(hist.total_latency(), 0);
    }
}
