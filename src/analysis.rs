//! Analysis orchestration - one pass from raw lines to an [`AnalysisResult`].
//!
//! # Pipeline
//!
//! ```text
//! lines ──> parser ──┬──> TrafficAggregator ──> Detector ──┐
//!                    └──> EntityRanker ────────────────────┴──> AnalysisResult
//! ```
//!
//! In parallel mode the input is cut into contiguous chunks. Each chunk is
//! parsed into its own [`Accumulator`] on the rayon pool, and the partials are
//! merged back in input order, so the result is identical to a sequential run.

use std::collections::BTreeMap;
use std::io::BufRead;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::aggregator::{Bucket, CountSeries, TrafficAggregator};
use crate::config::Config;
use crate::detector::{
    intensity_histogram, AnomalyWindow, Detector, HistogramBin, ThresholdDetector,
    TrafficStatistics,
};
use crate::error::{AnalysisError, RejectReason};
use crate::parser::parse_line;
use crate::ranker::{EntityRanker, RankedEntity};

/// Earliest and latest accepted timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TimeRange {
    pub fn duration(&self) -> chrono::Duration {
        self.end.signed_duration_since(self.start)
    }

    fn widen(&mut self, other: TimeRange) {
        if other.start < self.start {
            self.start = other.start;
        }
        if other.end > self.end {
            self.end = other.end;
        }
    }
}

/// Everything a report renderer needs from one run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub lines_read: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub rejected_by_reason: BTreeMap<RejectReason, u64>,
    pub time_range: Option<TimeRange>,
    /// Offset of the first accepted event, used to render bucket times.
    pub display_offset: FixedOffset,
    pub series: CountSeries,
    pub statistics: Option<TrafficStatistics>,
    pub threshold: Option<f64>,
    pub flagged: Vec<Bucket>,
    pub anomaly: Option<AnomalyWindow>,
    pub top_sources: Vec<RankedEntity>,
    pub wide_top_sources: Vec<RankedEntity>,
    pub distinct_sources: usize,
    pub status_codes: BTreeMap<u16, u64>,
    pub intensity_histogram: Vec<HistogramBin>,
}

impl AnalysisResult {
    /// Renders a UTC bucket time in the log's own offset.
    pub fn localize(&self, ts: DateTime<Utc>) -> DateTime<FixedOffset> {
        ts.with_timezone(&self.display_offset)
    }
}

/// Partition-local state for a run of contiguous lines.
#[derive(Debug, Clone)]
struct Accumulator {
    aggregator: TrafficAggregator,
    ranker: EntityRanker,
    lines: u64,
    rejected: BTreeMap<RejectReason, u64>,
    time_range: Option<TimeRange>,
    first_offset: Option<FixedOffset>,
}

impl Accumulator {
    fn new(bucket_secs: u32) -> Self {
        Self {
            aggregator: TrafficAggregator::new(bucket_secs),
            ranker: EntityRanker::new(),
            lines: 0,
            rejected: BTreeMap::new(),
            time_range: None,
            first_offset: None,
        }
    }

    fn ingest(&mut self, line_number: u64, line: &str) {
        self.lines += 1;

        match parse_line(line) {
            Ok(event) => {
                let ts = event.timestamp;
                match self.time_range.as_mut() {
                    Some(range) => range.widen(TimeRange { start: ts, end: ts }),
                    None => self.time_range = Some(TimeRange { start: ts, end: ts }),
                }
                self.first_offset.get_or_insert(*ts.offset());

                self.aggregator.add(&event);
                self.ranker.add(&event);
            }
            Err(reason) => {
                trace!("Rejected line {}: {}", line_number, reason);
                *self.rejected.entry(reason).or_insert(0) += 1;
            }
        }
    }

    /// Decodes a raw line and ingests it, rejecting invalid UTF-8.
    fn ingest_raw(&mut self, line_number: u64, raw: &[u8]) {
        match std::str::from_utf8(raw) {
            Ok(line) => self.ingest(line_number, line),
            Err(e) => {
                self.lines += 1;
                let reason = RejectReason::InvalidEncoding;
                trace!("Rejected line {}: {} ({})", line_number, reason, e);
                *self.rejected.entry(reason).or_insert(0) += 1;
            }
        }
    }

    /// Folds in the accumulator of the chunk that follows this one.
    fn merge(&mut self, later: Accumulator) {
        self.aggregator.merge(later.aggregator);
        self.ranker.merge(later.ranker);
        self.lines += later.lines;
        for (reason, count) in later.rejected {
            *self.rejected.entry(reason).or_insert(0) += count;
        }
        match (self.time_range.as_mut(), later.time_range) {
            (Some(range), Some(other)) => range.widen(other),
            (None, other) => self.time_range = other,
            (Some(_), None) => {}
        }
        if self.first_offset.is_none() {
            self.first_offset = later.first_offset;
        }
    }
}

/// Upper bound on the lines preallocated for one parallel batch.
const MAX_BATCH_PREALLOC: usize = 64 * 1024;

/// Reads one line into `buf` without its `\n` or `\r\n` ending.
///
/// Returns `false` at end of input. Bytes are not decoded here, so only a
/// failing reader produces an error.
fn read_raw_line<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    line_number: u64,
) -> Result<bool, AnalysisError> {
    buf.clear();
    let read = reader
        .read_until(b'\n', buf)
        .map_err(|source| AnalysisError::Io {
            line: line_number,
            source,
        })?;
    if read == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(true)
}

/// True when a multiple of `interval` lies in `(before, after]`.
fn crosses_progress_mark(before: u64, after: u64, interval: u64) -> bool {
    before / interval != after / interval
}

/// Runs the full pipeline according to a [`Config`].
pub struct Analyzer {
    config: Config,
    detector: Box<dyn Detector>,
}

impl Analyzer {
    pub fn new(config: Config) -> Result<Self, AnalysisError> {
        config.validate()?;
        let detector = Box::new(ThresholdDetector::new(
            config.detection.threshold_multiplier,
        ));
        Ok(Self { config, detector })
    }

    /// Analyzes lines from an in-memory source.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn analyze_lines<'a, I>(&self, lines: I) -> AnalysisResult
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut acc = Accumulator::new(self.config.aggregator.bucket_secs);
        for (idx, line) in lines.into_iter().enumerate() {
            let line_number = idx as u64 + 1;
            acc.ingest(line_number, line);
            self.report_progress(line_number);
        }
        self.finish(acc)
    }

    /// Analyzes a readable stream. A read failure aborts the run.
    pub fn analyze_reader<R: BufRead>(&self, reader: R) -> Result<AnalysisResult, AnalysisError> {
        let acc = if self.config.aggregator.parallel {
            self.accumulate_parallel(reader)?
        } else {
            self.accumulate_sequential(reader)?
        };
        Ok(self.finish(acc))
    }

    fn accumulate_sequential<R: BufRead>(&self, mut reader: R) -> Result<Accumulator, AnalysisError> {
        let mut acc = Accumulator::new(self.config.aggregator.bucket_secs);
        let mut buf = Vec::new();
        let mut line_number: u64 = 0;

        while read_raw_line(&mut reader, &mut buf, line_number + 1)? {
            line_number += 1;
            acc.ingest_raw(line_number, &buf);
            self.report_progress(line_number);
        }

        Ok(acc)
    }

    fn accumulate_parallel<R: BufRead>(&self, mut reader: R) -> Result<Accumulator, AnalysisError> {
        let bucket_secs = self.config.aggregator.bucket_secs;
        let chunk_lines = self.config.aggregator.chunk_lines;
        let threads = rayon::current_num_threads().max(1);
        let batch_lines = chunk_lines.saturating_mul(threads);

        info!(
            "Parallel aggregation: {} lines per chunk, {} threads",
            chunk_lines, threads
        );

        let mut acc = Accumulator::new(bucket_secs);
        let mut batch: Vec<Vec<u8>> = Vec::with_capacity(batch_lines.min(MAX_BATCH_PREALLOC));
        let mut buf = Vec::new();
        let mut next_line_number: u64 = 1;

        loop {
            batch.clear();
            while batch.len() < batch_lines
                && read_raw_line(&mut reader, &mut buf, next_line_number + batch.len() as u64)?
            {
                batch.push(std::mem::take(&mut buf));
            }
            if batch.is_empty() {
                break;
            }

            let base = next_line_number;
            let partials: Vec<Accumulator> = batch
                .par_chunks(chunk_lines)
                .enumerate()
                .map(|(chunk_idx, chunk)| {
                    let mut partial = Accumulator::new(bucket_secs);
                    let first = base + (chunk_idx * chunk_lines) as u64;
                    for (offset, line) in chunk.iter().enumerate() {
                        partial.ingest_raw(first + offset as u64, line);
                    }
                    partial
                })
                .collect();

            for partial in partials {
                acc.merge(partial);
            }

            let processed_before = next_line_number - 1;
            next_line_number += batch.len() as u64;
            self.report_batch_progress(processed_before, next_line_number - 1);
        }

        Ok(acc)
    }

    fn report_progress(&self, line_number: u64) {
        if line_number % self.config.parser.progress_interval == 0 {
            info!("Processed {} lines...", line_number);
        }
    }

    /// Logs once when a batch ending at `after` crosses a progress mark.
    fn report_batch_progress(&self, before: u64, after: u64) {
        if crosses_progress_mark(before, after, self.config.parser.progress_interval) {
            info!("Processed {} lines...", after);
        }
    }

    fn finish(&self, acc: Accumulator) -> AnalysisResult {
        let rejected: u64 = acc.rejected.values().sum();
        let accepted = acc.aggregator.event_count();

        debug!(
            "Aggregation complete: {} lines, {} accepted, {} rejected, {} distinct sources",
            acc.lines,
            acc.ranker.total(),
            rejected,
            acc.ranker.distinct_sources()
        );

        let series = acc.aggregator.finish();
        let detection = self.detector.detect(&series);
        let histogram = intensity_histogram(&series, self.config.detection.histogram_bins);

        if let Some(window) = &detection.window {
            info!(
                "Anomaly detected: {} buckets above {:.2}, peak {}",
                window.anomalous_bucket_count,
                detection.threshold.unwrap_or_default(),
                window.peak_count
            );
        } else if series.is_empty() {
            info!("No traffic observed");
        } else {
            info!(
                "No anomaly detected across {} buckets ({} events)",
                series.len(),
                series.total()
            );
        }

        AnalysisResult {
            lines_read: acc.lines,
            accepted,
            rejected,
            rejected_by_reason: acc.rejected,
            time_range: acc.time_range,
            display_offset: acc.first_offset.unwrap_or_else(|| Utc.fix()),
            series,
            statistics: detection.statistics,
            threshold: detection.threshold,
            flagged: detection.flagged,
            anomaly: detection.window,
            top_sources: acc.ranker.top_sources(self.config.ranking.top_sources),
            wide_top_sources: acc.ranker.top_sources(self.config.ranking.wide_top_sources),
            distinct_sources: acc.ranker.distinct_sources(),
            status_codes: acc.ranker.status_histogram(),
            intensity_histogram: histogram,
        }
    }
}
