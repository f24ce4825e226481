//! Anomaly detection over the per-bucket count series.
//!
//! # Statistical Methodology
//!
//! For bucket counts c₁..cₙ the detector computes the arithmetic mean μ and the
//! sample (Bessel-corrected, n − 1) standard deviation σ, then sets
//!
//! threshold = μ + k·σ
//!
//! where k is the threshold multiplier (default 2.0). Every bucket with a count
//! strictly above the threshold is anomalous.
//!
//! With a single bucket σ is taken to be 0, so the threshold equals the one
//! count and nothing can exceed it.
//!
//! The reported window spans from the first to the last anomalous bucket.
//! Quiet buckets between two bursts are inside that span.

use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::{Data, Distribution, Max, Min};
use tracing::debug;

use crate::aggregator::{Bucket, CountSeries};

/// Summary statistics of a non-empty count series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficStatistics {
    /// Number of non-empty buckets.
    pub buckets: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: u64,
    pub max: u64,
}

/// Calculates statistics for a set of bucket counts.
///
/// Returns `None` for an empty slice.
pub fn calculate_statistics(counts: &[f64]) -> Option<TrafficStatistics> {
    if counts.is_empty() {
        return None;
    }

    let data = Data::new(counts.to_vec());
    let mean = data.mean().unwrap_or(0.0);
    let std_dev = if counts.len() < 2 {
        0.0
    } else {
        data.std_dev().unwrap_or(0.0)
    };

    Some(TrafficStatistics {
        buckets: counts.len(),
        mean,
        std_dev,
        min: data.min() as u64,
        max: data.max() as u64,
    })
}

/// First-to-last span of anomalous buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub peak_count: u64,
    pub anomalous_bucket_count: usize,
}

impl AnomalyWindow {
    pub fn duration(&self) -> chrono::Duration {
        self.end.signed_duration_since(self.start)
    }
}

/// Outcome of running a detector over a series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    pub statistics: Option<TrafficStatistics>,
    pub threshold: Option<f64>,
    /// Every anomalous bucket, chronological.
    pub flagged: Vec<Bucket>,
    pub window: Option<AnomalyWindow>,
}

/// Trait for volumetric anomaly detection rules.
pub trait Detector: Send + Sync {
    fn detect(&self, series: &CountSeries) -> Detection;
}

/// Mean plus k standard deviations rule.
#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    multiplier: f64,
}

impl ThresholdDetector {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self { multiplier: 2.0 }
    }
}

impl Detector for ThresholdDetector {
    fn detect(&self, series: &CountSeries) -> Detection {
        let Some(statistics) = calculate_statistics(&series.counts()) else {
            return Detection::default();
        };

        let threshold = statistics.mean + self.multiplier * statistics.std_dev;

        let flagged: Vec<Bucket> = series
            .buckets()
            .iter()
            .filter(|b| b.count as f64 > threshold)
            .copied()
            .collect();

        let window = match (flagged.first(), flagged.last()) {
            (Some(first), Some(last)) => Some(AnomalyWindow {
                start: first.start,
                end: last.start,
                peak_count: flagged.iter().map(|b| b.count).max().unwrap_or(0),
                anomalous_bucket_count: flagged.len(),
            }),
            _ => None,
        };

        debug!(
            "Detection: mean={:.2} std_dev={:.2} threshold={:.2} flagged={}",
            statistics.mean,
            statistics.std_dev,
            threshold,
            flagged.len()
        );

        Detection {
            statistics: Some(statistics),
            threshold: Some(threshold),
            flagged,
            window,
        }
    }
}

/// One equal-width bin of the traffic intensity distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub buckets: u64,
}

/// Distribution of per-bucket counts over `bins` equal-width bins.
///
/// Bins span `[min, max]`; the last bin is closed on the right. When every
/// count is equal the range is widened to `[v - 0.5, v + 0.5]`.
pub fn intensity_histogram(series: &CountSeries, bins: usize) -> Vec<HistogramBin> {
    let (Some(lo), Some(hi)) = (
        series.buckets().iter().map(|b| b.count).min(),
        series.buckets().iter().map(|b| b.count).max(),
    ) else {
        return Vec::new();
    };
    if bins == 0 {
        return Vec::new();
    }

    let (lo, hi) = if lo == hi {
        (lo as f64 - 0.5, hi as f64 + 0.5)
    } else {
        (lo as f64, hi as f64)
    };
    let width = (hi - lo) / bins as f64;

    let mut histogram: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: lo + width * i as f64,
            upper: if i + 1 == bins { hi } else { lo + width * (i + 1) as f64 },
            buckets: 0,
        })
        .collect();

    for bucket in series.buckets() {
        let idx = (((bucket.count as f64 - lo) / width) as usize).min(bins - 1);
        histogram[idx].buckets += 1;
    }

    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::TrafficAggregator;
    use crate::parser::{LogEvent, TIMESTAMP_FORMAT};
    use proptest::prelude::*;

    fn series_from(counts: &[(i64, u64)]) -> CountSeries {
        let mut agg = TrafficAggregator::new(1);
        let base = DateTime::parse_from_str("2024-03-15 10:00:00+0000", TIMESTAMP_FORMAT).unwrap();
        for &(offset, count) in counts {
            for _ in 0..count {
                agg.add(&LogEvent {
                    source_address: "10.0.0.1".to_string(),
                    timestamp: base + chrono::Duration::seconds(offset),
                    request_line: "GET / HTTP/1.1".to_string(),
                    status_code: 200,
                    bytes_sent: 1,
                });
            }
        }
        agg.finish()
    }

    #[test]
    fn test_statistics_calculation() {
        let stats = calculate_statistics(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();

        assert_eq!(stats.buckets, 8);
        assert!((stats.mean - 5.0).abs() < 1e-9);
        // Sample variance = 32 / 7
        assert!((stats.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
        assert_eq!(stats.min, 2);
        assert_eq!(stats.max, 9);
    }

    #[test]
    fn test_statistics_empty() {
        assert!(calculate_statistics(&[]).is_none());
    }

    #[test]
    fn test_single_bucket_never_flagged() {
        let series = series_from(&[(0, 50)]);
        let detection = ThresholdDetector::default().detect(&series);

        let stats = detection.statistics.unwrap();
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(detection.threshold, Some(50.0));
        assert!(detection.flagged.is_empty());
        assert!(detection.window.is_none());
    }

    #[test]
    fn test_empty_series_has_no_detection() {
        let detection = ThresholdDetector::default().detect(&CountSeries::default());
        assert_eq!(detection, Detection::default());
    }

    #[test]
    fn test_two_buckets_not_flagged() {
        // Two requests at T, one at T+5.
        let series = series_from(&[(0, 2), (5, 1)]);
        let detection = ThresholdDetector::default().detect(&series);

        let stats = detection.statistics.unwrap();
        assert!((stats.mean - 1.5).abs() < 1e-12);
        assert!((stats.std_dev - 0.5f64.sqrt()).abs() < 1e-12);
        let threshold = detection.threshold.unwrap();
        assert!((threshold - (1.5 + 2.0 * 0.5f64.sqrt())).abs() < 1e-12);
        assert!(detection.window.is_none());
    }

    #[test]
    fn test_spike_is_flagged() {
        let mut counts: Vec<(i64, u64)> = (0..20).map(|i| (i, 3)).collect();
        counts.push((20, 40));
        let series = series_from(&counts);

        let detection = ThresholdDetector::default().detect(&series);
        let window = detection.window.unwrap();

        assert_eq!(window.start, window.end);
        assert_eq!(window.peak_count, 40);
        assert_eq!(window.anomalous_bucket_count, 1);
        assert_eq!(window.duration(), chrono::Duration::zero());
    }

    #[test]
    fn test_window_spans_non_contiguous_bursts() {
        let mut counts: Vec<(i64, u64)> = (0..30).map(|i| (i, 2)).collect();
        counts[5] = (5, 30);
        counts[25] = (25, 35);
        let series = series_from(&counts);

        let detection = ThresholdDetector::default().detect(&series);
        let window = detection.window.unwrap();

        assert_eq!(window.anomalous_bucket_count, 2);
        assert_eq!(window.peak_count, 35);
        assert_eq!(window.duration(), chrono::Duration::seconds(20));
        assert_eq!(detection.flagged.len(), 2);
        assert_eq!(detection.flagged[0].count, 30);
    }

    #[test]
    fn test_zero_multiplier_flags_above_mean() {
        let series = series_from(&[(0, 1), (1, 1), (2, 4)]);
        let detection = ThresholdDetector::new(0.0).detect(&series);
        assert_eq!(detection.threshold, Some(2.0));
        assert_eq!(detection.flagged.len(), 1);
    }

    #[test]
    fn test_intensity_histogram() {
        let series = series_from(&[(0, 1), (1, 2), (2, 2), (3, 5)]);
        let hist = intensity_histogram(&series, 4);

        assert_eq!(hist.len(), 4);
        assert_eq!(hist[0].lower, 1.0);
        assert_eq!(hist[3].upper, 5.0);
        let placed: Vec<u64> = hist.iter().map(|b| b.buckets).collect();
        assert_eq!(placed, vec![1, 2, 0, 1]);
    }

    #[test]
    fn test_intensity_histogram_flat_series() {
        let series = series_from(&[(0, 3), (1, 3)]);
        let hist = intensity_histogram(&series, 5);
        assert_eq!(hist.iter().map(|b| b.buckets).sum::<u64>(), 2);
        assert_eq!(hist[0].lower, 2.5);
        assert_eq!(hist[4].upper, 3.5);
    }

    #[test]
    fn test_intensity_histogram_empty() {
        assert!(intensity_histogram(&CountSeries::default(), 50).is_empty());
    }

    proptest! {
        #[test]
        fn prop_threshold_at_least_mean(counts in proptest::collection::vec(1u64..500, 1..60)) {
            let pairs: Vec<(i64, u64)> = counts.iter().enumerate().map(|(i, c)| (i as i64, *c)).collect();
            let series = series_from(&pairs);
            let detection = ThresholdDetector::default().detect(&series);

            let stats = detection.statistics.unwrap();
            let threshold = detection.threshold.unwrap();
            prop_assert!(threshold >= stats.mean);
            prop_assert!(detection.flagged.iter().all(|b| b.count as f64 >= stats.mean));
            if let Some(window) = detection.window {
                prop_assert!(window.start <= window.end);
                prop_assert_eq!(window.anomalous_bucket_count, detection.flagged.len());
            }
        }
    }
}
