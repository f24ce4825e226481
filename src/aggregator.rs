//! Traffic aggregation - buckets accepted events into fixed-width intervals.
//!
//! Buckets are keyed by their start in Unix seconds, truncated to a multiple of
//! the bucket width. Only buckets that received at least one event exist, so a
//! long quiet stretch between bursts costs nothing.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};

use crate::parser::LogEvent;

/// One non-empty bucket of the count series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub count: u64,
}

/// Chronological, sparse request counts per bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CountSeries {
    bucket_secs: u32,
    buckets: Vec<Bucket>,
}

impl CountSeries {
    pub fn bucket_secs(&self) -> u32 {
        self.bucket_secs
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Sum of all bucket counts.
    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Bucket counts as floats, in chronological order.
    pub fn counts(&self) -> Vec<f64> {
        self.buckets.iter().map(|b| b.count as f64).collect()
    }
}

/// Accumulates per-bucket counters.
#[derive(Debug, Clone)]
pub struct TrafficAggregator {
    bucket_secs: u32,
    buckets: BTreeMap<i64, u64>,
}

impl TrafficAggregator {
    /// Creates an aggregator; a zero width is treated as one second.
    pub fn new(bucket_secs: u32) -> Self {
        Self {
            bucket_secs: bucket_secs.max(1),
            buckets: BTreeMap::new(),
        }
    }

    /// Start of the bucket containing `timestamp`, in Unix seconds.
    pub fn bucket_key(&self, timestamp: &DateTime<FixedOffset>) -> i64 {
        let width = i64::from(self.bucket_secs);
        timestamp.timestamp().div_euclid(width) * width
    }

    pub fn add(&mut self, event: &LogEvent) {
        let key = self.bucket_key(&event.timestamp);
        *self.buckets.entry(key).or_insert(0) += 1;
    }

    /// Folds another partial aggregate into this one.
    pub fn merge(&mut self, other: TrafficAggregator) {
        debug_assert_eq!(self.bucket_secs, other.bucket_secs);
        for (key, count) in other.buckets {
            *self.buckets.entry(key).or_insert(0) += count;
        }
    }

    /// Number of events counted so far.
    pub fn event_count(&self) -> u64 {
        self.buckets.values().sum()
    }

    /// Emits the ascending count series.
    pub fn finish(self) -> CountSeries {
        let buckets = self
            .buckets
            .into_iter()
            .filter(|&(_, count)| count > 0)
            .filter_map(|(key, count)| {
                DateTime::from_timestamp(key, 0).map(|start| Bucket { start, count })
            })
            .collect();

        CountSeries {
            bucket_secs: self.bucket_secs,
            buckets,
        }
    }
}
