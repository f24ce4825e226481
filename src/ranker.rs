//! Entity frequency ranking for triage.
//!
//! Tracks how often each source address and each status code appears among
//! accepted events. Sources are ranked by descending count with ties broken
//! by first appearance; status codes are reported in ascending code order.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::parser::LogEvent;

/// A ranked key with its absolute and relative frequency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntity {
    pub key: String,
    pub count: u64,
    pub share_percent: f64,
}

/// Percentage of `total` represented by `count`; zero when `total` is zero.
pub fn share_percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * count as f64 / total as f64
}

#[derive(Debug, Clone, Copy)]
struct Tally {
    count: u64,
    /// Ordinal of the event that introduced this key.
    first_seen: u64,
}

/// Accumulates per-source and per-status counters.
#[derive(Debug, Clone, Default)]
pub struct EntityRanker {
    sources: HashMap<String, Tally>,
    statuses: BTreeMap<u16, u64>,
    total: u64,
}

impl EntityRanker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: &LogEvent) {
        let ordinal = self.total;
        self.total += 1;

        self.sources
            .entry(event.source_address.clone())
            .or_insert(Tally {
                count: 0,
                first_seen: ordinal,
            })
            .count += 1;

        *self.statuses.entry(event.status_code).or_insert(0) += 1;
    }

    /// Folds a partial ranker that observed events after this one.
    ///
    /// First-seen order of `self` precedes `later`, so merging contiguous
    /// chunks in input order reproduces the single-pass ranking.
    pub fn merge(&mut self, later: EntityRanker) {
        let offset = self.total;
        for (key, tally) in later.sources {
            self.sources
                .entry(key)
                .and_modify(|t| t.count += tally.count)
                .or_insert(Tally {
                    count: tally.count,
                    first_seen: offset + tally.first_seen,
                });
        }
        for (code, count) in later.statuses {
            *self.statuses.entry(code).or_insert(0) += count;
        }
        self.total += later.total;
    }

    /// Number of events observed.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of distinct source addresses.
    pub fn distinct_sources(&self) -> usize {
        self.sources.len()
    }

    /// The `top_n` most frequent source addresses.
    pub fn top_sources(&self, top_n: usize) -> Vec<RankedEntity> {
        let mut ranked: Vec<(&String, &Tally)> = self.sources.iter().collect();
        ranked.sort_by(|a, b| {
            b.1.count
                .cmp(&a.1.count)
                .then(a.1.first_seen.cmp(&b.1.first_seen))
        });

        ranked
            .into_iter()
            .take(top_n)
            .map(|(key, tally)| RankedEntity {
                key: key.clone(),
                count: tally.count,
                share_percent: share_percent(tally.count, self.total),
            })
            .collect()
    }

    /// Status code histogram, ascending by code.
    pub fn status_histogram(&self) -> BTreeMap<u16, u64> {
        self.statuses.clone()
    }
}
